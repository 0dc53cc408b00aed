//! `RoomActor` - per-room actor that owns room state.
//!
//! Each `RoomActor`:
//! - Owns one router and all participant state for one room
//! - Serializes every room mutation through its mailbox, so transport,
//!   producer and consumer bookkeeping needs no locks
//! - Relays chat and caption notifications between participants
//! - Tracks active recordings and stops them when the room shuts down
//!
//! # Participant Disconnect Handling
//!
//! When a participant leaves (explicitly or by socket close), the actor
//! closes everything the participant owned, then closes every other
//! participant's consumers that referenced the leaver's producers. The
//! response carries the remaining participant count so the coordinator can
//! remove the room when it empties.

use crate::errors::CoordError;
use crate::recording::{RecordingController, RecordingSession};

use super::messages::{
    ConsumeResult, JoinResult, Notification, ProducerSummary, RecordingInfo, RoomMessage,
    RoomState, TransportOptions,
};

use media_engine::{
    Consumer, MediaKind, Producer, Router, RtpCapabilities, TransportDirection, WebRtcTransport,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomActorHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Add a participant to the room.
    pub async fn join(
        &self,
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Result<JoinResult, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::Join {
            participant_id,
            user_id,
            notify,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Create a directional transport for a participant.
    pub async fn create_transport(
        &self,
        participant_id: String,
        direction: TransportDirection,
    ) -> Result<TransportOptions, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::CreateTransport {
            participant_id,
            direction,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Supply DTLS parameters for a transport.
    pub async fn connect_transport(
        &self,
        participant_id: String,
        transport_id: String,
        dtls_parameters: Value,
    ) -> Result<(), CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::ConnectTransport {
            participant_id,
            transport_id,
            dtls_parameters,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Publish a media stream on the participant's send transport.
    /// Returns the new producer ID.
    pub async fn produce(
        &self,
        participant_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::Produce {
            participant_id,
            kind,
            rtp_parameters,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Subscribe to another participant's producer on the participant's
    /// receive transport. The consumer starts paused; call
    /// [`resume_consumer`](Self::resume_consumer) to start forwarding.
    pub async fn consume(
        &self,
        participant_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
    ) -> Result<ConsumeResult, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::Consume {
            participant_id,
            producer_id,
            rtp_capabilities,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Start forwarding on a paused consumer.
    pub async fn resume_consumer(
        &self,
        participant_id: String,
        consumer_id: String,
    ) -> Result<(), CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::ResumeConsumer {
            participant_id,
            consumer_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Start recording every producer currently active in the room.
    pub async fn start_recording(
        &self,
        participant_id: String,
    ) -> Result<Vec<RecordingInfo>, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::StartRecording {
            participant_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Relay a chat message to every participant in the room, the sender
    /// included.
    pub async fn chat(&self, participant_id: String, message: String) -> Result<(), CoordError> {
        self.send(RoomMessage::Chat {
            participant_id,
            message,
        })
        .await
    }

    /// Relay a live caption to every participant in the room.
    pub async fn caption(&self, participant_id: String, text: String) -> Result<(), CoordError> {
        self.send(RoomMessage::Caption {
            participant_id,
            text,
        })
        .await
    }

    /// Remove a participant. Returns the number of participants remaining.
    pub async fn leave(&self, participant_id: String) -> Result<usize, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::Leave {
            participant_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Snapshot of room state.
    pub async fn get_state(&self) -> Result<RoomState, CoordError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.send(RoomMessage::GetState { respond_to: tx }).await?;
        self.receive(rx).await
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// A send failure means the room actor is gone, which from the
    /// caller's perspective is a room that no longer exists.
    async fn send(&self, message: RoomMessage) -> Result<(), CoordError> {
        self.sender
            .send(message)
            .await
            .map_err(|_| CoordError::RoomNotFound(self.room_id.clone()))
    }

    async fn receive<T>(&self, rx: tokio::sync::oneshot::Receiver<T>) -> Result<T, CoordError> {
        rx.await
            .map_err(|e| CoordError::Internal(format!("response receive failed: {e}")))
    }
}

/// Participant state within a room.
struct Participant {
    participant_id: String,
    user_id: String,
    /// Notification channel back to the participant's connection.
    notify: mpsc::UnboundedSender<Notification>,
    /// Send-direction transport, if created.
    send_transport: Option<WebRtcTransport>,
    /// Receive-direction transport, if created.
    recv_transport: Option<WebRtcTransport>,
    /// Producers by media kind (one audio, one video at most).
    producers: HashMap<MediaKind, Producer>,
    /// Consumers keyed by the producer they subscribe to.
    consumers: HashMap<String, Consumer>,
}

impl Participant {
    fn transport(&self, transport_id: &str) -> Option<&WebRtcTransport> {
        [self.send_transport.as_ref(), self.recv_transport.as_ref()]
            .into_iter()
            .flatten()
            .find(|t| t.id() == transport_id)
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: String,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of coordinator's token).
    cancel_token: CancellationToken,
    /// The room's router, bound to one worker for the room's lifetime.
    router: Router,
    /// Participants by ID.
    participants: HashMap<String, Participant>,
    /// Recording controller shared across rooms.
    recording: RecordingController,
    /// Active recordings.
    recordings: Vec<RecordingSession>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        router: Router,
        recording: RecordingController,
        cancel_token: CancellationToken,
    ) -> (RoomActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            router,
            participants: HashMap::new(),
            recording,
            recordings: Vec::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "coord.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            router_id = %self.router.id(),
            worker_id = %self.router.worker().id(),
            "RoomActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "coord.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(msg) => self.handle_message(msg).await,
                        None => {
                            debug!(
                                target: "coord.actor.room",
                                room_id = %self.room_id,
                                "RoomActor mailbox closed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn handle_message(&mut self, msg: RoomMessage) {
        match msg {
            RoomMessage::Join {
                participant_id,
                user_id,
                notify,
                respond_to,
            } => {
                let result = self.handle_join(participant_id, user_id, notify).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::CreateTransport {
                participant_id,
                direction,
                respond_to,
            } => {
                let result = self.handle_create_transport(&participant_id, direction).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::ConnectTransport {
                participant_id,
                transport_id,
                dtls_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_connect_transport(&participant_id, &transport_id, dtls_parameters)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Produce {
                participant_id,
                kind,
                rtp_parameters,
                respond_to,
            } => {
                let result = self
                    .handle_produce(&participant_id, kind, rtp_parameters)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Consume {
                participant_id,
                producer_id,
                rtp_capabilities,
                respond_to,
            } => {
                let result = self
                    .handle_consume(&participant_id, &producer_id, &rtp_capabilities)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomMessage::ResumeConsumer {
                participant_id,
                consumer_id,
                respond_to,
            } => {
                let result = self.handle_resume_consumer(&participant_id, &consumer_id);
                let _ = respond_to.send(result);
            }
            RoomMessage::StartRecording {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_start_recording(&participant_id).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::Chat {
                participant_id,
                message,
            } => {
                self.handle_chat(&participant_id, message);
            }
            RoomMessage::Caption {
                participant_id,
                text,
            } => {
                self.handle_caption(&participant_id, text);
            }
            RoomMessage::Leave {
                participant_id,
                respond_to,
            } => {
                let result = self.handle_leave(&participant_id).await;
                let _ = respond_to.send(result);
            }
            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state_snapshot());
            }
        }
    }

    async fn handle_join(
        &mut self,
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Result<JoinResult, CoordError> {
        // A room whose backing worker died cannot serve media; refuse the
        // join (the process is on its way down anyway)
        if !self.router.worker().is_live() {
            return Err(CoordError::WorkerFailure(
                self.router.worker().id().to_string(),
            ));
        }

        // A rejoin under the same ID replaces the previous session
        if self.participants.contains_key(&participant_id) {
            warn!(
                target: "coord.actor.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                "Participant rejoined, releasing previous session"
            );
            self.release_participant(&participant_id).await;
        }

        let existing_producers = self
            .participants
            .values()
            .flat_map(|p| {
                p.producers.values().filter(|producer| !producer.is_closed()).map(
                    |producer| ProducerSummary {
                        producer_id: producer.id().to_string(),
                        kind: producer.kind(),
                        user_id: p.user_id.clone(),
                    },
                )
            })
            .collect();

        self.participants.insert(
            participant_id.clone(),
            Participant {
                participant_id: participant_id.clone(),
                user_id,
                notify,
                send_transport: None,
                recv_transport: None,
                producers: HashMap::new(),
                consumers: HashMap::new(),
            },
        );

        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            participant_count = self.participants.len(),
            "Participant joined"
        );
        metrics::counter!("sc_participants_joined_total").increment(1);

        Ok(JoinResult {
            router_rtp_capabilities: self.router.rtp_capabilities(),
            existing_producers,
        })
    }

    async fn handle_create_transport(
        &mut self,
        participant_id: &str,
        direction: TransportDirection,
    ) -> Result<TransportOptions, CoordError> {
        // Creation goes through the router first so a dead worker surfaces
        // before any participant state changes
        let transport = self.router.create_webrtc_transport(direction).await?;

        let participant = self
            .participants
            .get_mut(participant_id)
            .ok_or_else(|| CoordError::ParticipantNotFound(participant_id.to_string()))?;

        let slot = match direction {
            TransportDirection::Send => &mut participant.send_transport,
            TransportDirection::Recv => &mut participant.recv_transport,
        };

        // Replacing a transport closes the old one first so its ports and
        // streams are released
        if let Some(previous) = slot.take() {
            debug!(
                target: "coord.actor.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                transport_id = %previous.id(),
                direction = %direction,
                "Replacing existing transport"
            );
            previous.close().await;
        }

        let options = TransportOptions {
            transport_id: transport.id().to_string(),
            ice_parameters: transport.ice_parameters(),
            ice_candidates: transport.ice_candidates(),
            dtls_parameters: transport.dtls_parameters(),
        };
        *slot = Some(transport);

        Ok(options)
    }

    async fn handle_connect_transport(
        &mut self,
        participant_id: &str,
        transport_id: &str,
        dtls_parameters: Value,
    ) -> Result<(), CoordError> {
        if !self.participants.contains_key(participant_id) {
            return Err(CoordError::ParticipantNotFound(participant_id.to_string()));
        }

        // The transport is looked up room-wide by ID; a linear scan is fine
        // at room scale
        let transport = self
            .participants
            .values()
            .find_map(|p| p.transport(transport_id))
            .ok_or_else(|| CoordError::TransportNotFound(transport_id.to_string()))?;

        transport.connect(dtls_parameters).await?;
        Ok(())
    }

    async fn handle_produce(
        &mut self,
        participant_id: &str,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<String, CoordError> {
        let participant = self
            .participants
            .get(participant_id)
            .ok_or_else(|| CoordError::ParticipantNotFound(participant_id.to_string()))?;
        let user_id = participant.user_id.clone();

        // Producing always goes out on the participant's send transport
        let transport = participant
            .send_transport
            .as_ref()
            .ok_or_else(|| CoordError::TransportNotFound("send".to_string()))?;

        let producer = transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id().to_string();

        if let Some(participant) = self.participants.get_mut(participant_id) {
            // One producer per kind; producing again replaces the stream
            if let Some(previous) = participant.producers.insert(kind, producer) {
                previous.close();
            }
        }

        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            producer_id = %producer_id,
            kind = %kind,
            "Producer created"
        );

        self.broadcast_except(
            participant_id,
            &Notification::NewProducer {
                producer_id: producer_id.clone(),
                kind,
                user_id,
            },
        );

        Ok(producer_id)
    }

    async fn handle_consume(
        &mut self,
        participant_id: &str,
        producer_id: &str,
        rtp_capabilities: &RtpCapabilities,
    ) -> Result<ConsumeResult, CoordError> {
        if !self.producer_exists(producer_id) {
            return Err(CoordError::ProducerNotFound(producer_id.to_string()));
        }

        let participant = self
            .participants
            .get(participant_id)
            .ok_or_else(|| CoordError::ParticipantNotFound(participant_id.to_string()))?;

        // Consuming always comes in on the participant's receive transport
        let transport = participant
            .recv_transport
            .as_ref()
            .ok_or_else(|| CoordError::TransportNotFound("recv".to_string()))?;

        // Consumers start paused; the client resumes once its receive side
        // is wired up
        let consumer = transport
            .consume(producer_id, rtp_capabilities, true)
            .await?;

        let result = ConsumeResult {
            consumer_id: consumer.id().to_string(),
            producer_id: producer_id.to_string(),
            kind: consumer.kind(),
            rtp_parameters: consumer.rtp_parameters(),
        };

        if let Some(participant) = self.participants.get_mut(participant_id) {
            // One consumer per producer; consuming again replaces it
            if let Some(previous) = participant
                .consumers
                .insert(producer_id.to_string(), consumer)
            {
                previous.close();
            }
        }

        debug!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            consumer_id = %result.consumer_id,
            producer_id = %producer_id,
            "Consumer created (paused)"
        );

        Ok(result)
    }

    fn handle_resume_consumer(
        &mut self,
        participant_id: &str,
        consumer_id: &str,
    ) -> Result<(), CoordError> {
        let participant = self
            .participants
            .get(participant_id)
            .ok_or_else(|| CoordError::ParticipantNotFound(participant_id.to_string()))?;

        let consumer = participant
            .consumers
            .values()
            .find(|consumer| consumer.id() == consumer_id)
            .ok_or_else(|| CoordError::ConsumerNotFound(consumer_id.to_string()))?;

        consumer.resume()?;
        debug!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            consumer_id = %consumer_id,
            "Consumer resumed, forwarding active"
        );
        Ok(())
    }

    async fn handle_start_recording(
        &mut self,
        participant_id: &str,
    ) -> Result<Vec<RecordingInfo>, CoordError> {
        if !self.participants.contains_key(participant_id) {
            return Err(CoordError::ParticipantNotFound(participant_id.to_string()));
        }

        let producer_ids: Vec<String> = self
            .participants
            .values()
            .flat_map(|p| p.producers.values())
            .filter(|producer| !producer.is_closed())
            .map(|producer| producer.id().to_string())
            .collect();

        let mut started = Vec::new();
        for producer_id in producer_ids {
            match self
                .recording
                .start_for_producer(&self.router, &producer_id)
                .await
            {
                Ok(session) => {
                    started.push(RecordingInfo {
                        producer_id: producer_id.clone(),
                        file: session.file().to_string(),
                    });
                    self.recordings.push(session);
                }
                Err(e) => {
                    // Best-effort: one failed pipeline does not stop the rest
                    warn!(
                        target: "coord.actor.room",
                        room_id = %self.room_id,
                        producer_id = %producer_id,
                        error = %e,
                        "Failed to start recording for producer"
                    );
                }
            }
        }

        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            started = started.len(),
            "Recording request handled"
        );
        Ok(started)
    }

    fn handle_chat(&self, participant_id: &str, message: String) {
        if !self.participants.contains_key(participant_id) {
            debug!(
                target: "coord.actor.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                "Chat from unknown participant dropped"
            );
            return;
        }

        // Chat echoes back to the sender too, so every client renders the
        // same transcript
        self.broadcast(&Notification::ChatMessage {
            from: participant_id.to_string(),
            message,
        });
    }

    fn handle_caption(&self, participant_id: &str, text: String) {
        if !self.participants.contains_key(participant_id) {
            return;
        }
        self.broadcast(&Notification::NewCaption { text });
    }

    async fn handle_leave(&mut self, participant_id: &str) -> Result<usize, CoordError> {
        if !self.participants.contains_key(participant_id) {
            // Disconnect cleanup can race an explicit leave; both are fine
            debug!(
                target: "coord.actor.room",
                room_id = %self.room_id,
                participant_id = %participant_id,
                "Leave for unknown participant ignored"
            );
            return Ok(self.participants.len());
        }

        self.release_participant(participant_id).await;

        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            remaining = self.participants.len(),
            "Participant left"
        );
        Ok(self.participants.len())
    }

    /// Close everything a participant owns, then prune the consumers other
    /// participants hold on the leaver's producers.
    async fn release_participant(&mut self, participant_id: &str) {
        let Some(participant) = self.participants.remove(participant_id) else {
            return;
        };

        let closed_producers: HashSet<String> = participant
            .producers
            .values()
            .map(|producer| producer.id().to_string())
            .collect();

        for consumer in participant.consumers.values() {
            consumer.close();
        }
        for producer in participant.producers.values() {
            producer.close();
        }
        if let Some(transport) = participant.send_transport {
            transport.close().await;
        }
        if let Some(transport) = participant.recv_transport {
            transport.close().await;
        }

        // Consumers elsewhere in the room that referenced the leaver's
        // producers are now dead streams
        for other in self.participants.values_mut() {
            other.consumers.retain(|producer_id, consumer| {
                if closed_producers.contains(producer_id) {
                    consumer.close();
                    false
                } else {
                    true
                }
            });
        }
    }

    fn producer_exists(&self, producer_id: &str) -> bool {
        self.participants.values().any(|p| {
            p.producers
                .values()
                .any(|producer| producer.id() == producer_id && !producer.is_closed())
        })
    }

    /// Fan a notification out to every participant in the room.
    fn broadcast(&self, notification: &Notification) {
        for participant in self.participants.values() {
            if participant.notify.send(notification.clone()).is_err() {
                debug!(
                    target: "coord.actor.room",
                    room_id = %self.room_id,
                    participant_id = %participant.participant_id,
                    "Notification channel closed, skipping"
                );
            }
        }
    }

    /// Fan a notification out to everyone except its originator.
    fn broadcast_except(&self, exclude_participant_id: &str, notification: &Notification) {
        for participant in self.participants.values() {
            if participant.participant_id == exclude_participant_id {
                continue;
            }
            if participant.notify.send(notification.clone()).is_err() {
                debug!(
                    target: "coord.actor.room",
                    room_id = %self.room_id,
                    participant_id = %participant.participant_id,
                    "Notification channel closed, skipping"
                );
            }
        }
    }

    fn state_snapshot(&self) -> RoomState {
        RoomState {
            room_id: self.room_id.clone(),
            worker_id: self.router.worker().id().to_string(),
            participant_count: self.participants.len(),
            producer_ids: self
                .participants
                .values()
                .flat_map(|p| {
                    p.producers
                        .values()
                        .map(|producer| producer.id().to_string())
                })
                .collect(),
            consumer_count: self
                .participants
                .values()
                .map(|p| p.consumers.len())
                .sum(),
            forwarding_count: self
                .participants
                .values()
                .flat_map(|p| p.consumers.values())
                .filter(|c| c.is_forwarding())
                .count(),
            recording_count: self.recordings.len(),
        }
    }

    async fn shutdown(mut self) {
        for session in self.recordings.drain(..) {
            session.stop().await;
        }

        let participant_ids: Vec<String> = self.participants.keys().cloned().collect();
        for participant_id in participant_ids {
            self.release_participant(&participant_id).await;
        }

        info!(
            target: "coord.actor.room",
            room_id = %self.room_id,
            "RoomActor stopped"
        );
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::recording::RecordingController;
    use media_engine::{EngineSettings, Worker};
    use serde_json::json;

    async fn spawn_room(room_id: &str) -> (RoomActorHandle, JoinHandle<()>) {
        let worker = Worker::launch(0, EngineSettings::default());
        let router = worker.create_router().await.unwrap();
        let recording = RecordingController::new("sh".to_string(), std::env::temp_dir());
        RoomActor::spawn(
            room_id.to_string(),
            router,
            recording,
            CancellationToken::new(),
        )
    }

    fn notify_channel() -> (
        mpsc::UnboundedSender<Notification>,
        mpsc::UnboundedReceiver<Notification>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Join, create+connect a send transport, produce. Returns the
    /// transport and producer IDs.
    async fn join_and_produce(
        room: &RoomActorHandle,
        participant_id: &str,
        user_id: &str,
    ) -> (String, String, mpsc::UnboundedReceiver<Notification>) {
        let (notify, notify_rx) = notify_channel();
        room.join(participant_id.to_string(), user_id.to_string(), notify)
            .await
            .unwrap();

        let transport = room
            .create_transport(participant_id.to_string(), TransportDirection::Send)
            .await
            .unwrap();
        room.connect_transport(
            participant_id.to_string(),
            transport.transport_id.clone(),
            json!({"role": "client"}),
        )
        .await
        .unwrap();

        let producer_id = room
            .produce(
                participant_id.to_string(),
                MediaKind::Audio,
                json!({"codecs": []}),
            )
            .await
            .unwrap();

        (transport.transport_id, producer_id, notify_rx)
    }

    #[tokio::test]
    async fn test_handle_debug_output_names_room() {
        let (room, _task) = spawn_room("r1").await;
        let rendered = format!("{room:?}");
        assert!(rendered.contains("RoomActorHandle"));
        assert!(rendered.contains("r1"));
    }

    #[tokio::test]
    async fn test_join_refused_when_worker_dead() {
        let worker = Worker::launch(0, EngineSettings::default());
        let router = worker.create_router().await.unwrap();
        let recording = RecordingController::new("sh".to_string(), std::env::temp_dir());
        let (room, _task) = RoomActor::spawn(
            "r1".to_string(),
            router,
            recording,
            CancellationToken::new(),
        );

        worker.fail();

        let (notify, _rx) = notify_channel();
        let result = room.join("p1".to_string(), "alice".to_string(), notify).await;
        assert!(matches!(result, Err(CoordError::WorkerFailure(_))));
    }

    #[tokio::test]
    async fn test_join_returns_router_capabilities() {
        let (room, _task) = spawn_room("r1").await;
        let (notify, _rx) = notify_channel();

        let result = room
            .join("p1".to_string(), "alice".to_string(), notify)
            .await
            .unwrap();

        assert!(result
            .router_rtp_capabilities
            .supports_kind(MediaKind::Audio));
        assert!(result.existing_producers.is_empty());
    }

    #[tokio::test]
    async fn test_late_joiner_sees_existing_producers() {
        let (room, _task) = spawn_room("r1").await;
        let (_, producer_id, _rx_a) = join_and_produce(&room, "p1", "alice").await;

        let (notify, _rx_b) = notify_channel();
        let result = room
            .join("p2".to_string(), "bob".to_string(), notify)
            .await
            .unwrap();

        assert_eq!(result.existing_producers.len(), 1);
        let summary = result.existing_producers.first().unwrap();
        assert_eq!(summary.producer_id, producer_id);
        assert_eq!(summary.user_id, "alice");
    }

    #[tokio::test]
    async fn test_produce_notifies_other_participants() {
        let (room, _task) = spawn_room("r1").await;

        let (notify_b, mut rx_b) = notify_channel();
        room.join("p2".to_string(), "bob".to_string(), notify_b)
            .await
            .unwrap();

        let (_, producer_id, mut rx_a) = join_and_produce(&room, "p1", "alice").await;

        let notification = rx_b.recv().await.unwrap();
        assert_eq!(
            notification,
            Notification::NewProducer {
                producer_id,
                kind: MediaKind::Audio,
                user_id: "alice".to_string(),
            }
        );

        // The producing participant does not hear about its own producer
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let (room, _task) = spawn_room("r1").await;
        let (notify, _rx) = notify_channel();
        room.join("p1".to_string(), "alice".to_string(), notify)
            .await
            .unwrap();

        let _transport = room
            .create_transport("p1".to_string(), TransportDirection::Send)
            .await
            .unwrap();

        // No connect_transport call first
        let result = room
            .produce("p1".to_string(), MediaKind::Audio, json!({}))
            .await;
        assert!(matches!(result, Err(CoordError::InvalidTransportState(_))));
    }

    #[tokio::test]
    async fn test_produce_without_send_transport_is_not_found() {
        let (room, _task) = spawn_room("r1").await;
        let (notify, _rx) = notify_channel();
        room.join("p1".to_string(), "alice".to_string(), notify)
            .await
            .unwrap();

        let result = room
            .produce("p1".to_string(), MediaKind::Audio, json!({}))
            .await;
        assert!(matches!(result, Err(CoordError::TransportNotFound(_))));
    }

    #[tokio::test]
    async fn test_consume_starts_paused_and_resume_activates_forwarding() {
        let (room, _task) = spawn_room("r1").await;
        let (_, producer_id, _rx_a) = join_and_produce(&room, "p1", "alice").await;

        let (notify, _rx_b) = notify_channel();
        let join = room
            .join("p2".to_string(), "bob".to_string(), notify)
            .await
            .unwrap();

        let recv_transport = room
            .create_transport("p2".to_string(), TransportDirection::Recv)
            .await
            .unwrap();
        room.connect_transport(
            "p2".to_string(),
            recv_transport.transport_id.clone(),
            json!({"role": "client"}),
        )
        .await
        .unwrap();

        let consume = room
            .consume(
                "p2".to_string(),
                producer_id.clone(),
                join.router_rtp_capabilities,
            )
            .await
            .unwrap();
        assert_eq!(consume.producer_id, producer_id);

        // Two-phase activation: no forwarding until the explicit resume
        let state = room.get_state().await.unwrap();
        assert_eq!(state.consumer_count, 1);
        assert_eq!(state.forwarding_count, 0);

        room.resume_consumer("p2".to_string(), consume.consumer_id)
            .await
            .unwrap();

        let state = room.get_state().await.unwrap();
        assert_eq!(state.forwarding_count, 1);
    }

    #[tokio::test]
    async fn test_consume_unknown_producer_is_not_found() {
        let (room, _task) = spawn_room("r1").await;
        let (notify, _rx) = notify_channel();
        let join = room
            .join("p1".to_string(), "alice".to_string(), notify)
            .await
            .unwrap();

        let _transport = room
            .create_transport("p1".to_string(), TransportDirection::Recv)
            .await
            .unwrap();

        let result = room
            .consume(
                "p1".to_string(),
                "producer-missing".to_string(),
                join.router_rtp_capabilities,
            )
            .await;
        assert!(matches!(result, Err(CoordError::ProducerNotFound(_))));
    }

    #[tokio::test]
    async fn test_consume_with_incapable_capabilities_is_rejected() {
        let (room, _task) = spawn_room("r1").await;
        let (_, producer_id, _rx_a) = join_and_produce(&room, "p1", "alice").await;

        let (notify, _rx_b) = notify_channel();
        let join = room
            .join("p2".to_string(), "bob".to_string(), notify)
            .await
            .unwrap();

        let transport = room
            .create_transport("p2".to_string(), TransportDirection::Recv)
            .await
            .unwrap();
        room.connect_transport(
            "p2".to_string(),
            transport.transport_id.clone(),
            json!({"role": "client"}),
        )
        .await
        .unwrap();

        // Strip the audio codecs; the producer is audio
        let video_only = RtpCapabilities {
            codecs: join
                .router_rtp_capabilities
                .codecs
                .into_iter()
                .filter(|c| c.kind == MediaKind::Video)
                .collect(),
        };

        let result = room
            .consume("p2".to_string(), producer_id, video_only)
            .await;
        assert!(matches!(result, Err(CoordError::CapabilityMismatch(_))));
    }

    #[tokio::test]
    async fn test_leave_closes_own_and_dependent_resources() {
        let (room, _task) = spawn_room("r1").await;
        let (_, producer_id, _rx_a) = join_and_produce(&room, "p1", "alice").await;

        let (notify, _rx_b) = notify_channel();
        let join = room
            .join("p2".to_string(), "bob".to_string(), notify)
            .await
            .unwrap();
        let transport = room
            .create_transport("p2".to_string(), TransportDirection::Recv)
            .await
            .unwrap();
        room.connect_transport(
            "p2".to_string(),
            transport.transport_id.clone(),
            json!({"role": "client"}),
        )
        .await
        .unwrap();
        room.consume("p2".to_string(), producer_id, join.router_rtp_capabilities)
            .await
            .unwrap();

        // Alice leaves; Bob's consumer of her producer must go with her
        let remaining = room.leave("p1".to_string()).await.unwrap();
        assert_eq!(remaining, 1);

        let state = room.get_state().await.unwrap();
        assert_eq!(state.participant_count, 1);
        assert!(state.producer_ids.is_empty());
        assert_eq!(state.consumer_count, 0);
    }

    #[tokio::test]
    async fn test_leave_unknown_participant_is_graceful() {
        let (room, _task) = spawn_room("r1").await;
        let remaining = room.leave("ghost".to_string()).await.unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_chat_reaches_every_member_including_sender() {
        let (room, _task) = spawn_room("r1").await;

        let (notify_a, mut rx_a) = notify_channel();
        room.join("p1".to_string(), "alice".to_string(), notify_a)
            .await
            .unwrap();
        let (notify_b, mut rx_b) = notify_channel();
        room.join("p2".to_string(), "bob".to_string(), notify_b)
            .await
            .unwrap();

        room.chat("p1".to_string(), "hello".to_string())
            .await
            .unwrap();

        let expected = Notification::ChatMessage {
            from: "p1".to_string(),
            message: "hello".to_string(),
        };
        assert_eq!(rx_b.recv().await.unwrap(), expected);
        // The sender sees its own message echoed back
        assert_eq!(rx_a.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_caption_broadcast_includes_sender() {
        let (room, _task) = spawn_room("r1").await;

        let (notify_a, mut rx_a) = notify_channel();
        room.join("p1".to_string(), "alice".to_string(), notify_a)
            .await
            .unwrap();
        let (notify_b, mut rx_b) = notify_channel();
        room.join("p2".to_string(), "bob".to_string(), notify_b)
            .await
            .unwrap();

        room.caption("p1".to_string(), "caption text".to_string())
            .await
            .unwrap();

        let expected = Notification::NewCaption {
            text: "caption text".to_string(),
        };
        assert_eq!(rx_b.recv().await.unwrap(), expected);
        assert_eq!(rx_a.recv().await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_start_recording_covers_active_producers() {
        let (room, _task) = spawn_room("r1").await;
        let (_, producer_id, _rx) = join_and_produce(&room, "p1", "alice").await;

        let started = room.start_recording("p1".to_string()).await.unwrap();
        assert_eq!(started.len(), 1);
        let info = started.first().unwrap();
        assert_eq!(info.producer_id, producer_id);
        assert!(info.file.contains("record_"));

        let state = room.get_state().await.unwrap();
        assert_eq!(state.recording_count, 1);
    }

    #[tokio::test]
    async fn test_operations_against_gone_room_report_not_found() {
        let (room, task) = spawn_room("r1").await;
        room.cancel();
        let _ = task.await;

        let (notify, _rx) = notify_channel();
        let result = room.join("p1".to_string(), "alice".to_string(), notify).await;
        assert!(matches!(result, Err(CoordError::RoomNotFound(_))));
    }
}
