//! Cross-instance room synchronization.
//!
//! When a room is created, the coordinator publishes a `roomCreated` event
//! on a Redis pub/sub channel. Other instances receive it and warm a local
//! cache of rooms known to exist elsewhere. The cache is eventually
//! consistent and informational only; no room operation depends on it, and
//! losing an event merely means a peer learns about the room later or not
//! at all.

use crate::errors::CoordError;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Channel buffer for outgoing room events.
pub const ROOM_EVENT_BUFFER: usize = 64;

/// Events published across instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum RoomEvent {
    /// A room was created on some instance.
    #[serde(rename_all = "camelCase")]
    RoomCreated {
        room_id: String,
        instance_id: String,
    },
}

/// Cache of rooms known to exist on peer instances.
///
/// Warmed by the subscriber task; never consulted on the hot path.
#[derive(Debug, Default)]
pub struct PeerRoomCache {
    rooms: RwLock<HashSet<String>>,
}

impl PeerRoomCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, room_id: String) {
        self.rooms.write().await.insert(room_id);
    }

    pub async fn contains(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains(room_id)
    }

    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

/// Running sync layer: the peer cache plus its background tasks.
pub struct ScaleSync {
    pub cache: Arc<PeerRoomCache>,
    pub publish_task: JoinHandle<()>,
    pub subscribe_task: JoinHandle<()>,
}

impl ScaleSync {
    /// Connect to Redis and spawn the publish and subscribe tasks.
    ///
    /// Events arriving on `events_rx` are published to `channel`; events
    /// received from peers (other instance IDs) warm the cache.
    pub async fn spawn(
        redis_url: &str,
        channel: String,
        instance_id: String,
        events_rx: mpsc::Receiver<RoomEvent>,
        cancel_token: CancellationToken,
    ) -> Result<Self, CoordError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CoordError::Redis(format!("Failed to open Redis client: {e}")))?;

        let publish_conn = redis::aio::ConnectionManager::new(client.clone())
            .await
            .map_err(|e| CoordError::Redis(format!("Failed to connect to Redis: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CoordError::Redis(format!("Failed to open pub/sub connection: {e}")))?;
        pubsub
            .subscribe(&channel)
            .await
            .map_err(|e| CoordError::Redis(format!("Failed to subscribe to {channel}: {e}")))?;

        info!(
            target: "coord.scalesync",
            channel = %channel,
            instance_id = %instance_id,
            "ScaleSync connected"
        );

        let cache = Arc::new(PeerRoomCache::new());

        let publish_task = tokio::spawn(run_publisher(
            publish_conn,
            channel.clone(),
            events_rx,
            cancel_token.clone(),
        ));

        let subscribe_task = tokio::spawn(run_subscriber(
            pubsub,
            instance_id,
            Arc::clone(&cache),
            cancel_token,
        ));

        Ok(Self {
            cache,
            publish_task,
            subscribe_task,
        })
    }
}

async fn run_publisher(
    mut conn: redis::aio::ConnectionManager,
    channel: String,
    mut events_rx: mpsc::Receiver<RoomEvent>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "coord.scalesync", "Publisher shutting down");
                break;
            }
            event = events_rx.recv() => {
                let Some(event) = event else {
                    debug!(target: "coord.scalesync", "Event channel closed");
                    break;
                };
                publish_event(&mut conn, &channel, &event).await;
            }
        }
    }
}

async fn publish_event(
    conn: &mut redis::aio::ConnectionManager,
    channel: &str,
    event: &RoomEvent,
) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "coord.scalesync", error = %e, "Failed to serialize room event");
            return;
        }
    };

    // Best-effort: a lost publish only delays peer cache warming
    let result: Result<(), redis::RedisError> =
        redis::AsyncCommands::publish(conn, channel, payload).await;
    match result {
        Ok(()) => {
            debug!(target: "coord.scalesync", ?event, "Room event published");
        }
        Err(e) => {
            warn!(target: "coord.scalesync", error = %e, "Failed to publish room event");
        }
    }
}

async fn run_subscriber(
    mut pubsub: redis::aio::PubSub,
    instance_id: String,
    cache: Arc<PeerRoomCache>,
    cancel_token: CancellationToken,
) {
    let mut stream = pubsub.on_message();

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!(target: "coord.scalesync", "Subscriber shutting down");
                break;
            }
            msg = stream.next() => {
                let Some(msg) = msg else {
                    warn!(target: "coord.scalesync", "Pub/sub stream ended");
                    break;
                };
                handle_peer_message(&msg, &instance_id, &cache).await;
            }
        }
    }
}

/// Incoming payload on the room channel. The channel itself scopes the
/// event, so only `roomId` is required; the tag and origin fields our own
/// publisher adds are optional extras a minimal peer may omit.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PeerRoomCreated {
    room_id: String,
    #[serde(default)]
    instance_id: Option<String>,
}

async fn handle_peer_message(msg: &redis::Msg, instance_id: &str, cache: &PeerRoomCache) {
    let payload: String = match msg.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(target: "coord.scalesync", error = %e, "Unreadable pub/sub payload");
            return;
        }
    };
    apply_peer_payload(&payload, instance_id, cache).await;
}

async fn apply_peer_payload(payload: &str, instance_id: &str, cache: &PeerRoomCache) {
    let event: PeerRoomCreated = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(
                target: "coord.scalesync",
                error = %e,
                "Ignoring malformed room event"
            );
            return;
        }
    };

    // Our own events echo back on the channel
    if event.instance_id.as_deref() == Some(instance_id) {
        return;
    }

    debug!(
        target: "coord.scalesync",
        room_id = %event.room_id,
        origin = event.instance_id.as_deref().unwrap_or("unknown"),
        "Learned of peer room"
    );
    cache.insert(event.room_id).await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_event_wire_format() {
        let event = RoomEvent::RoomCreated {
            room_id: "r1".to_string(),
            instance_id: "sc-host-abc".to_string(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "roomCreated");
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["instanceId"], "sc-host-abc");

        let parsed: RoomEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[tokio::test]
    async fn test_minimal_peer_payload_warms_cache() {
        let cache = PeerRoomCache::new();

        // A peer that only sends the room ID still counts
        apply_peer_payload(r#"{"roomId":"r7"}"#, "sc-self", &cache).await;
        assert!(cache.contains("r7").await);

        // The full payload our own publisher emits works the same way
        apply_peer_payload(
            r#"{"event":"roomCreated","roomId":"r8","instanceId":"sc-peer"}"#,
            "sc-self",
            &cache,
        )
        .await;
        assert!(cache.contains("r8").await);
    }

    #[tokio::test]
    async fn test_own_events_are_filtered() {
        let cache = PeerRoomCache::new();
        apply_peer_payload(
            r#"{"event":"roomCreated","roomId":"r1","instanceId":"sc-self"}"#,
            "sc-self",
            &cache,
        )
        .await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_ignored() {
        let cache = PeerRoomCache::new();
        apply_peer_payload(r#"{"event":"unknown"}"#, "sc-self", &cache).await;
        apply_peer_payload("not json", "sc-self", &cache).await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_peer_cache_insert_and_lookup() {
        let cache = PeerRoomCache::new();
        assert!(cache.is_empty().await);
        assert!(!cache.contains("r1").await);

        cache.insert("r1".to_string()).await;
        assert!(cache.contains("r1").await);
        assert_eq!(cache.len().await, 1);

        // Duplicate inserts collapse
        cache.insert("r1".to_string()).await;
        assert_eq!(cache.len().await, 1);
    }
}
