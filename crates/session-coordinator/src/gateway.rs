//! Signaling gateway.
//!
//! One WebSocket connection per participant. Requests are JSON frames with
//! an `action` tag and optional `requestId`; every request gets a reply
//! frame echoing the `requestId` with either `ok` or `error`.
//! Server-initiated notifications arrive as separate frames with an
//! `event` tag.
//!
//! Every post-join request names its room explicitly, so one connection
//! can be active in several rooms at once; the session only tracks which
//! rooms were joined so disconnect can release each of them. The gateway
//! owns no room state. It resolves the room handle through the coordinator
//! per request; a handle whose actor is gone surfaces as `RoomNotFound`,
//! which is exactly what a caller racing room removal should see.

use crate::actors::messages::Notification;
use crate::actors::CoordinatorActorHandle;
use crate::errors::CoordError;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use media_engine::{MediaKind, RtpCapabilities, TransportDirection};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Shared state for the signaling routes.
#[derive(Clone)]
pub struct GatewayState {
    pub coordinator: Arc<CoordinatorActorHandle>,
}

/// One client request frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    #[serde(default)]
    pub request_id: Option<u64>,
    #[serde(flatten)]
    pub action: ClientAction,
}

/// The operations a client can request.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "camelCase")]
pub enum ClientAction {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, user_id: String },

    #[serde(rename_all = "camelCase")]
    CreateTransport {
        room_id: String,
        direction: TransportDirection,
    },

    #[serde(rename_all = "camelCase")]
    ConnectTransport {
        room_id: String,
        transport_id: String,
        dtls_parameters: Value,
    },

    #[serde(rename_all = "camelCase")]
    Produce {
        room_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    },

    #[serde(rename_all = "camelCase")]
    Consume {
        room_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    },

    #[serde(rename_all = "camelCase")]
    ResumeConsumer {
        room_id: String,
        consumer_id: String,
    },

    #[serde(rename_all = "camelCase")]
    StartRecording { room_id: String },

    #[serde(rename_all = "camelCase")]
    CreateBreakout {
        room_id: String,
        breakout_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ChatMessage { room_id: String, message: String },

    #[serde(rename_all = "camelCase")]
    SendCaption { room_id: String, text: String },

    #[serde(rename_all = "camelCase")]
    LeaveRoom { room_id: String },
}

/// One server reply frame.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReply {
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Client-safe error payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl ServerReply {
    fn from_result(request_id: Option<u64>, result: Result<Value, CoordError>) -> Self {
        match result {
            Ok(ok) => Self {
                request_id,
                ok: Some(ok),
                error: None,
            },
            Err(e) => Self {
                request_id,
                ok: None,
                error: Some(ErrorBody {
                    code: e.error_code(),
                    message: e.client_message(),
                }),
            },
        }
    }
}

/// Per-connection signaling session.
pub struct Session {
    /// Participant ID, fixed for the connection's lifetime.
    pub participant_id: String,
    /// Rooms joined on this connection, in join order. Disconnect releases
    /// every one of them.
    pub rooms: Vec<String>,
    /// Notification channel registered with each room at join time.
    notify: mpsc::UnboundedSender<Notification>,
}

impl Session {
    #[must_use]
    pub fn new(notify: mpsc::UnboundedSender<Notification>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let short = suffix.get(..8).unwrap_or("00000000");
        Self {
            participant_id: format!("participant-{short}"),
            rooms: Vec::new(),
            notify,
        }
    }
}

/// WebSocket upgrade handler for `/ws`.
pub async fn ws_handler(
    State(state): State<GatewayState>,
    upgrade: WebSocketUpgrade,
) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| handle_socket(socket, state.coordinator))
}

/// Drive one WebSocket connection until it closes.
async fn handle_socket(mut socket: WebSocket, coordinator: Arc<CoordinatorActorHandle>) {
    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let mut session = Session::new(notify_tx);

    info!(
        target: "coord.gateway",
        participant_id = %session.participant_id,
        "Connection opened"
    );

    loop {
        tokio::select! {
            notification = notify_rx.recv() => {
                let Some(notification) = notification else {
                    // Room dropped our notification channel
                    break;
                };
                match serde_json::to_string(&notification) {
                    Ok(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "coord.gateway",
                            error = %e,
                            "Failed to serialize notification"
                        );
                    }
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        let reply = handle_frame(&text, &mut session, &coordinator).await;
                        match serde_json::to_string(&reply) {
                            Ok(frame) => {
                                if socket.send(Message::Text(frame)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(
                                    target: "coord.gateway",
                                    error = %e,
                                    "Failed to serialize reply"
                                );
                            }
                        }
                    }
                    Message::Close(_) => break,
                    // Pings are answered by the protocol layer
                    _ => {}
                }
            }
        }
    }

    release_session(&mut session, &coordinator).await;

    info!(
        target: "coord.gateway",
        participant_id = %session.participant_id,
        "Connection closed"
    );
}

/// Implicit disconnect: release everything the connection owned, in every
/// room it joined. Each room is cleaned up independently; one failure does
/// not stop the rest.
pub async fn release_session(session: &mut Session, coordinator: &CoordinatorActorHandle) {
    for room_id in session.rooms.drain(..) {
        if let Err(e) = coordinator
            .participant_left(room_id.clone(), session.participant_id.clone())
            .await
        {
            warn!(
                target: "coord.gateway",
                participant_id = %session.participant_id,
                room_id = %room_id,
                error = %e,
                "Disconnect cleanup failed"
            );
        }
    }
}

async fn handle_frame(
    text: &str,
    session: &mut Session,
    coordinator: &CoordinatorActorHandle,
) -> ServerReply {
    let request: ClientRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            debug!(target: "coord.gateway", error = %e, "Malformed request frame");
            return ServerReply::from_result(
                None,
                Err(CoordError::Internal(format!("malformed request: {e}"))),
            );
        }
    };

    let result = dispatch(request.action, session, coordinator).await;
    ServerReply::from_result(request.request_id, result)
}

/// Execute one client action against the actor system.
pub async fn dispatch(
    action: ClientAction,
    session: &mut Session,
    coordinator: &CoordinatorActorHandle,
) -> Result<Value, CoordError> {
    match action {
        ClientAction::JoinRoom { room_id, user_id } => {
            let result = coordinator
                .join_room(
                    room_id.clone(),
                    session.participant_id.clone(),
                    user_id,
                    session.notify.clone(),
                )
                .await?;
            if !session.rooms.contains(&room_id) {
                session.rooms.push(room_id);
            }
            serde_json::to_value(result).map_err(|e| CoordError::Internal(e.to_string()))
        }

        ClientAction::CreateTransport { room_id, direction } => {
            let room = room_handle(coordinator, room_id).await?;
            let options = room
                .create_transport(session.participant_id.clone(), direction)
                .await?;
            serde_json::to_value(options).map_err(|e| CoordError::Internal(e.to_string()))
        }

        ClientAction::ConnectTransport {
            room_id,
            transport_id,
            dtls_parameters,
        } => {
            let room = room_handle(coordinator, room_id).await?;
            room.connect_transport(
                session.participant_id.clone(),
                transport_id,
                dtls_parameters,
            )
            .await?;
            Ok(json!({ "connected": true }))
        }

        ClientAction::Produce {
            room_id,
            kind,
            rtp_parameters,
        } => {
            let room = room_handle(coordinator, room_id).await?;
            let producer_id = room
                .produce(session.participant_id.clone(), kind, rtp_parameters)
                .await?;
            Ok(json!({ "producerId": producer_id }))
        }

        ClientAction::Consume {
            room_id,
            producer_id,
            rtp_capabilities,
        } => {
            let room = room_handle(coordinator, room_id).await?;
            let result = room
                .consume(
                    session.participant_id.clone(),
                    producer_id,
                    rtp_capabilities,
                )
                .await?;
            serde_json::to_value(result).map_err(|e| CoordError::Internal(e.to_string()))
        }

        ClientAction::ResumeConsumer {
            room_id,
            consumer_id,
        } => {
            let room = room_handle(coordinator, room_id).await?;
            room.resume_consumer(session.participant_id.clone(), consumer_id)
                .await?;
            Ok(json!({ "resumed": true }))
        }

        ClientAction::StartRecording { room_id } => {
            let room = room_handle(coordinator, room_id).await?;
            let started = room
                .start_recording(session.participant_id.clone())
                .await?;
            let recordings =
                serde_json::to_value(started).map_err(|e| CoordError::Internal(e.to_string()))?;
            Ok(json!({ "started": true, "recordings": recordings }))
        }

        ClientAction::CreateBreakout {
            room_id,
            breakout_id,
        } => {
            coordinator.create_breakout(room_id, breakout_id).await?;
            Ok(json!({ "success": true }))
        }

        ClientAction::ChatMessage { room_id, message } => {
            let room = room_handle(coordinator, room_id).await?;
            room.chat(session.participant_id.clone(), message).await?;
            Ok(json!({}))
        }

        ClientAction::SendCaption { room_id, text } => {
            let room = room_handle(coordinator, room_id).await?;
            room.caption(session.participant_id.clone(), text).await?;
            Ok(json!({}))
        }

        ClientAction::LeaveRoom { room_id } => {
            session.rooms.retain(|joined| joined != &room_id);
            coordinator
                .participant_left(room_id, session.participant_id.clone())
                .await?;
            Ok(json!({}))
        }
    }
}

/// Resolve a room through the coordinator registry.
async fn room_handle(
    coordinator: &CoordinatorActorHandle,
    room_id: String,
) -> Result<crate::actors::RoomActorHandle, CoordError> {
    coordinator
        .get_room(room_id.clone())
        .await?
        .ok_or(CoordError::RoomNotFound(room_id))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::recording::RecordingController;
    use crate::workers::WorkerPool;
    use media_engine::EngineSettings;

    fn coordinator() -> CoordinatorActorHandle {
        let pool = Arc::new(
            WorkerPool::launch(1, &EngineSettings::default()).expect("pool should launch"),
        );
        let recording = RecordingController::new("sh".to_string(), std::env::temp_dir());
        CoordinatorActorHandle::new("sc-test".to_string(), pool, recording, None)
    }

    fn session() -> (Session, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Session::new(tx), rx)
    }

    async fn join(session: &mut Session, coordinator: &CoordinatorActorHandle, room_id: &str) {
        dispatch(
            ClientAction::JoinRoom {
                room_id: room_id.to_string(),
                user_id: "alice".to_string(),
            },
            session,
            coordinator,
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_request_parsing() {
        let request: ClientRequest = serde_json::from_str(
            r#"{"requestId": 7, "action": "joinRoom", "data": {"roomId": "r1", "userId": "alice"}}"#,
        )
        .unwrap();
        assert_eq!(request.request_id, Some(7));
        assert!(matches!(
            request.action,
            ClientAction::JoinRoom { ref room_id, ref user_id }
                if room_id == "r1" && user_id == "alice"
        ));

        let request: ClientRequest = serde_json::from_str(
            r#"{"action": "startRecording", "data": {"roomId": "r1"}}"#,
        )
        .unwrap();
        assert!(request.request_id.is_none());
        assert!(matches!(request.action, ClientAction::StartRecording { .. }));
    }

    #[test]
    fn test_media_request_shapes() {
        // Produce names kind, parameters and room; the transport is the
        // caller's send transport
        let request: ClientRequest = serde_json::from_str(
            r#"{"requestId": 2, "action": "produce", "data": {"kind": "audio", "rtpParameters": {"codecs": []}, "roomId": "r1"}}"#,
        )
        .unwrap();
        assert!(matches!(
            request.action,
            ClientAction::Produce { ref room_id, kind, .. }
                if room_id == "r1" && kind == MediaKind::Audio
        ));

        // Consume names the producer and capabilities; the transport is
        // the caller's receive transport
        let request: ClientRequest = serde_json::from_str(
            r#"{"action": "consume", "data": {"producerId": "producer-ab", "rtpCapabilities": {"codecs": []}, "roomId": "r1"}}"#,
        )
        .unwrap();
        assert!(matches!(
            request.action,
            ClientAction::Consume { ref producer_id, .. } if producer_id == "producer-ab"
        ));
    }

    #[test]
    fn test_reply_wire_format() {
        let ok = ServerReply::from_result(Some(3), Ok(json!({"producerId": "producer-ab"})));
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["requestId"], 3);
        assert_eq!(json["ok"]["producerId"], "producer-ab");
        assert!(json.get("error").is_none());

        let err = ServerReply::from_result(
            Some(4),
            Err(CoordError::RoomNotFound("r1".to_string())),
        );
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"]["code"], 4);
        assert_eq!(json["error"]["message"], "Room not found");
        assert!(json.get("ok").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_room_is_not_found() {
        let coordinator = coordinator();
        let (mut session, _rx) = session();

        let result = dispatch(
            ClientAction::CreateTransport {
                room_id: "r1".to_string(),
                direction: TransportDirection::Send,
            },
            &mut session,
            &coordinator,
        )
        .await;
        assert!(matches!(result, Err(CoordError::RoomNotFound(_))));
    }

    #[tokio::test]
    async fn test_dispatch_full_signaling_flow() {
        let coordinator = coordinator();
        let (mut session, _rx) = session();

        let join = dispatch(
            ClientAction::JoinRoom {
                room_id: "r1".to_string(),
                user_id: "alice".to_string(),
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();
        assert!(join.get("routerRtpCapabilities").is_some());
        assert_eq!(session.rooms, vec!["r1"]);

        let transport = dispatch(
            ClientAction::CreateTransport {
                room_id: "r1".to_string(),
                direction: TransportDirection::Send,
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();
        let transport_id = transport["transportId"].as_str().unwrap().to_string();

        dispatch(
            ClientAction::ConnectTransport {
                room_id: "r1".to_string(),
                transport_id,
                dtls_parameters: json!({"role": "client"}),
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();

        let produce = dispatch(
            ClientAction::Produce {
                room_id: "r1".to_string(),
                kind: MediaKind::Audio,
                rtp_parameters: json!({"codecs": []}),
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();
        assert!(produce["producerId"].as_str().unwrap().starts_with("producer-"));
    }

    #[tokio::test]
    async fn test_leave_room_clears_session_and_room() {
        let coordinator = coordinator();
        let (mut session, _rx) = session();

        join(&mut session, &coordinator, "r1").await;

        dispatch(
            ClientAction::LeaveRoom {
                room_id: "r1".to_string(),
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();
        assert!(session.rooms.is_empty());

        // Sole participant left, so the room is gone
        assert!(coordinator.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_releases_every_joined_room() {
        let coordinator = coordinator();
        let (mut session, _rx) = session();

        join(&mut session, &coordinator, "r1").await;
        join(&mut session, &coordinator, "r2").await;
        assert_eq!(session.rooms, vec!["r1", "r2"]);

        release_session(&mut session, &coordinator).await;

        // Both rooms emptied with the disconnect, so neither survives it
        assert!(session.rooms.is_empty());
        assert!(coordinator.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_breakout_through_gateway() {
        let coordinator = coordinator();
        let (mut session, _rx) = session();

        join(&mut session, &coordinator, "r1").await;

        let result = dispatch(
            ClientAction::CreateBreakout {
                room_id: "r1".to_string(),
                breakout_id: "b1".to_string(),
            },
            &mut session,
            &coordinator,
        )
        .await
        .unwrap();
        assert_eq!(result["success"], true);

        // The breakout is registered alongside the parent
        let rooms = coordinator.list_rooms().await.unwrap();
        assert_eq!(rooms, vec!["b1", "r1"]);
    }

    #[test]
    fn test_malformed_frame_reply_has_error() {
        let reply = ServerReply::from_result(
            None,
            Err(CoordError::Internal("malformed request".to_string())),
        );
        assert_eq!(reply.error.as_ref().map(|e| e.code), Some(6));
    }
}
