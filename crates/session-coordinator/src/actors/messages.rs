//! Message types for the actor system.
//!
//! All cross-actor communication goes through these enums. Requests that
//! need an answer carry a `respond_to` oneshot sender; fire-and-forget
//! notifications do not.

use crate::errors::CoordError;

use media_engine::{MediaKind, RtpCapabilities, TransportDirection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Messages handled by the `CoordinatorActor`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// Join a room, creating it on first use.
    JoinRoom {
        room_id: String,
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
        respond_to: oneshot::Sender<Result<JoinResult, CoordError>>,
    },

    /// Look up the handle for an existing room.
    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Option<super::room::RoomActorHandle>>,
    },

    /// A participant left (explicit leave or socket close). Removes the
    /// room when it becomes empty.
    ParticipantLeft {
        room_id: String,
        participant_id: String,
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// Create a breakout room attached to a parent room, under a
    /// caller-chosen ID.
    CreateBreakout {
        parent_room_id: String,
        breakout_room_id: String,
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// List the rooms currently hosted on this instance.
    ListRooms {
        respond_to: oneshot::Sender<Vec<String>>,
    },

    /// Gracefully shut down all rooms, waiting up to `timeout` per room.
    Shutdown {
        timeout: std::time::Duration,
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },
}

/// Messages handled by a `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Add a participant to the room.
    Join {
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
        respond_to: oneshot::Sender<Result<JoinResult, CoordError>>,
    },

    /// Create a directional transport for a participant.
    CreateTransport {
        participant_id: String,
        direction: TransportDirection,
        respond_to: oneshot::Sender<Result<TransportOptions, CoordError>>,
    },

    /// Supply DTLS parameters for a transport.
    ConnectTransport {
        participant_id: String,
        transport_id: String,
        dtls_parameters: Value,
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// Publish a media stream on the participant's send transport.
    Produce {
        participant_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        respond_to: oneshot::Sender<Result<String, CoordError>>,
    },

    /// Subscribe to another participant's producer on the participant's
    /// receive transport. The consumer starts paused.
    Consume {
        participant_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
        respond_to: oneshot::Sender<Result<ConsumeResult, CoordError>>,
    },

    /// Start forwarding on a paused consumer.
    ResumeConsumer {
        participant_id: String,
        consumer_id: String,
        respond_to: oneshot::Sender<Result<(), CoordError>>,
    },

    /// Start recording every producer currently active in the room.
    StartRecording {
        participant_id: String,
        respond_to: oneshot::Sender<Result<Vec<RecordingInfo>, CoordError>>,
    },

    /// Relay a chat message to every participant in the room.
    Chat {
        participant_id: String,
        message: String,
    },

    /// Relay a live caption to every participant in the room.
    Caption {
        participant_id: String,
        text: String,
    },

    /// Remove a participant and release everything they own. Responds with
    /// the number of participants remaining.
    Leave {
        participant_id: String,
        respond_to: oneshot::Sender<Result<usize, CoordError>>,
    },

    /// Snapshot of room state (introspection and tests).
    GetState {
        respond_to: oneshot::Sender<RoomState>,
    },
}

/// Result of joining a room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    /// The codec set clients must negotiate against.
    pub router_rtp_capabilities: RtpCapabilities,
    /// Producers already active in the room, so a late joiner can consume
    /// them immediately.
    pub existing_producers: Vec<ProducerSummary>,
}

/// A producer visible to other participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: String,
    pub kind: MediaKind,
    pub user_id: String,
}

/// Connection parameters for a freshly created transport.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    pub transport_id: String,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Result of a consume request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeResult {
    pub consumer_id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// One started recording.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    pub producer_id: String,
    pub file: String,
}

/// Room state snapshot.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    pub worker_id: String,
    pub participant_count: usize,
    pub producer_ids: Vec<String>,
    pub consumer_count: usize,
    pub forwarding_count: usize,
    pub recording_count: usize,
}

/// Server-initiated notifications pushed to connected clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum Notification {
    /// A new producer appeared in the room.
    #[serde(rename_all = "camelCase")]
    NewProducer {
        producer_id: String,
        kind: MediaKind,
        user_id: String,
    },

    /// A chat message relayed to every room member, the sender included.
    /// `from` carries the sender's connection ID.
    #[serde(rename_all = "camelCase")]
    ChatMessage { from: String, message: String },

    /// A live caption relayed to every room member.
    #[serde(rename_all = "camelCase")]
    NewCaption { text: String },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_wire_format() {
        let notification = Notification::NewProducer {
            producer_id: "producer-ab12".to_string(),
            kind: MediaKind::Video,
            user_id: "user-1".to_string(),
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "newProducer");
        assert_eq!(json["data"]["producerId"], "producer-ab12");
        assert_eq!(json["data"]["kind"], "video");
        assert_eq!(json["data"]["userId"], "user-1");
    }

    #[test]
    fn test_chat_notification_wire_format() {
        let notification = Notification::ChatMessage {
            from: "user-2".to_string(),
            message: "hello".to_string(),
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "chatMessage");
        assert_eq!(json["data"]["from"], "user-2");
        assert_eq!(json["data"]["message"], "hello");
    }

    #[test]
    fn test_caption_notification_wire_format() {
        let notification = Notification::NewCaption {
            text: "live caption".to_string(),
        };

        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["event"], "newCaption");
        assert_eq!(json["data"]["text"], "live caption");
    }

    #[test]
    fn test_transport_options_serialize_camel_case() {
        let options = TransportOptions {
            transport_id: "transport-cd34".to_string(),
            ice_parameters: serde_json::json!({"usernameFragment": "frag"}),
            ice_candidates: serde_json::json!([]),
            dtls_parameters: serde_json::json!({"role": "auto"}),
        };

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["transportId"], "transport-cd34");
        assert!(json.get("iceParameters").is_some());
        assert!(json.get("dtlsParameters").is_some());
    }
}
