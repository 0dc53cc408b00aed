//! `CoordinatorActor` - singleton actor that owns the room registry.
//!
//! Rooms are created lazily on first join and removed when their last
//! participant leaves. Both paths run inside this actor's message loop, so
//! two concurrent joins to the same new room resolve to one `RoomActor`,
//! and a join can never interleave with the empty-room removal it races.
//!
//! Room creation draws a worker from the pool round-robin and publishes a
//! `roomCreated` event for peer instances. Breakout rooms are full rooms
//! registered under their breakout ID with a parent link; removing the
//! parent cascades to its breakouts.

use crate::errors::CoordError;
use crate::recording::RecordingController;
use crate::scalesync::RoomEvent;
use crate::workers::WorkerPool;

use super::messages::{CoordinatorMessage, JoinResult, Notification};
use super::room::{RoomActor, RoomActorHandle};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 500;

/// Per-room wait during graceful shutdown.
const SHUTDOWN_ROOM_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `CoordinatorActor`.
#[derive(Clone)]
pub struct CoordinatorActorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
}

impl CoordinatorActorHandle {
    /// Spawn the coordinator actor and return its handle.
    #[must_use]
    pub fn new(
        instance_id: String,
        worker_pool: Arc<WorkerPool>,
        recording: RecordingController,
        events_tx: Option<mpsc::Sender<RoomEvent>>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = CoordinatorActor {
            instance_id,
            receiver,
            cancel_token: cancel_token.clone(),
            worker_pool,
            recording,
            events_tx,
            rooms: HashMap::new(),
        };

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Join a room, creating it on first use.
    pub async fn join_room(
        &self,
        room_id: String,
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Result<JoinResult, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::JoinRoom {
            room_id,
            participant_id,
            user_id,
            notify,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Look up the handle for an existing room.
    pub async fn get_room(&self, room_id: String) -> Result<Option<RoomActorHandle>, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetRoom {
            room_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await
    }

    /// Report a participant leaving. Removes the room when it empties.
    pub async fn participant_left(
        &self,
        room_id: String,
        participant_id: String,
    ) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::ParticipantLeft {
            room_id,
            participant_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// Create a breakout room attached to a parent, registered under the
    /// caller-chosen breakout ID.
    pub async fn create_breakout(
        &self,
        parent_room_id: String,
        breakout_room_id: String,
    ) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::CreateBreakout {
            parent_room_id,
            breakout_room_id,
            respond_to: tx,
        })
        .await?;
        self.receive(rx).await?
    }

    /// List the rooms currently hosted on this instance.
    pub async fn list_rooms(&self) -> Result<Vec<String>, CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::ListRooms { respond_to: tx })
            .await?;
        self.receive(rx).await
    }

    /// Gracefully shut down all rooms.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), CoordError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::Shutdown {
            timeout,
            respond_to: tx,
        })
        .await?;
        let result = self.receive(rx).await?;
        self.cancel_token.cancel();
        result
    }

    /// Get a child token tied to the coordinator's lifetime.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    /// Cancel the coordinator and everything under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), CoordError> {
        self.sender
            .send(message)
            .await
            .map_err(|e| CoordError::Internal(format!("channel send failed: {e}")))
    }

    async fn receive<T>(&self, rx: oneshot::Receiver<T>) -> Result<T, CoordError> {
        rx.await
            .map_err(|e| CoordError::Internal(format!("response receive failed: {e}")))
    }
}

/// A room under coordinator management.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    /// Parent room ID when this is a breakout room.
    parent: Option<String>,
}

/// The `CoordinatorActor` implementation.
struct CoordinatorActor {
    instance_id: String,
    receiver: mpsc::Receiver<CoordinatorMessage>,
    cancel_token: CancellationToken,
    worker_pool: Arc<WorkerPool>,
    recording: RecordingController,
    /// Outgoing room events for the sync layer, when enabled.
    events_tx: Option<mpsc::Sender<RoomEvent>>,
    /// Rooms by ID.
    rooms: HashMap<String, ManagedRoom>,
}

impl CoordinatorActor {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "coord.actor.coordinator", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "coord.actor.coordinator",
            instance_id = %self.instance_id,
            workers = self.worker_pool.len(),
            "CoordinatorActor started"
        );

        loop {
            // Reap rooms whose actor task has terminated
            self.check_room_health();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "coord.actor.coordinator",
                        "CoordinatorActor received cancellation signal"
                    );
                    break;
                }
                msg = self.receiver.recv() => {
                    match msg {
                        Some(msg) => {
                            if self.handle_message(msg).await {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "coord.actor.coordinator",
                                "CoordinatorActor mailbox closed"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.shutdown_rooms(SHUTDOWN_ROOM_TIMEOUT).await;
        info!(
            target: "coord.actor.coordinator",
            "CoordinatorActor stopped"
        );
    }

    /// Handle one message. Returns true when the loop should exit.
    async fn handle_message(&mut self, msg: CoordinatorMessage) -> bool {
        match msg {
            CoordinatorMessage::JoinRoom {
                room_id,
                participant_id,
                user_id,
                notify,
                respond_to,
            } => {
                let result = self
                    .handle_join_room(room_id, participant_id, user_id, notify)
                    .await;
                let _ = respond_to.send(result);
            }
            CoordinatorMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let handle = self.rooms.get(&room_id).map(|room| room.handle.clone());
                let _ = respond_to.send(handle);
            }
            CoordinatorMessage::ParticipantLeft {
                room_id,
                participant_id,
                respond_to,
            } => {
                let result = self.handle_participant_left(&room_id, participant_id).await;
                let _ = respond_to.send(result);
            }
            CoordinatorMessage::CreateBreakout {
                parent_room_id,
                breakout_room_id,
                respond_to,
            } => {
                let result = self
                    .handle_create_breakout(&parent_room_id, breakout_room_id)
                    .await;
                let _ = respond_to.send(result);
            }
            CoordinatorMessage::ListRooms { respond_to } => {
                let mut rooms: Vec<String> = self.rooms.keys().cloned().collect();
                rooms.sort();
                let _ = respond_to.send(rooms);
            }
            CoordinatorMessage::Shutdown {
                timeout,
                respond_to,
            } => {
                self.shutdown_rooms(timeout).await;
                let _ = respond_to.send(Ok(()));
                return true;
            }
        }
        false
    }

    async fn handle_join_room(
        &mut self,
        room_id: String,
        participant_id: String,
        user_id: String,
        notify: mpsc::UnboundedSender<Notification>,
    ) -> Result<JoinResult, CoordError> {
        let created = if self.rooms.contains_key(&room_id) {
            false
        } else {
            self.create_room(room_id.clone(), None).await?;
            self.publish_event(RoomEvent::RoomCreated {
                room_id: room_id.clone(),
                instance_id: self.instance_id.clone(),
            });
            true
        };

        let handle = self
            .rooms
            .get(&room_id)
            .map(|room| room.handle.clone())
            .ok_or_else(|| CoordError::RoomNotFound(room_id.clone()))?;

        let result = handle.join(participant_id, user_id, notify).await;

        // A failed first join leaves a freshly created room empty; take it
        // back out rather than leaking it
        if result.is_err() && created {
            self.remove_room(&room_id);
        }

        result
    }

    async fn handle_participant_left(
        &mut self,
        room_id: &str,
        participant_id: String,
    ) -> Result<(), CoordError> {
        let Some(handle) = self.rooms.get(room_id).map(|room| room.handle.clone()) else {
            // Already removed; leaving twice is fine
            debug!(
                target: "coord.actor.coordinator",
                room_id = %room_id,
                "Leave for unknown room ignored"
            );
            return Ok(());
        };

        match handle.leave(participant_id).await {
            Ok(0) => {
                self.remove_room(room_id);
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(CoordError::RoomNotFound(_)) => {
                // The room actor died underneath us; drop the registry entry
                self.remove_room(room_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_create_breakout(
        &mut self,
        parent_room_id: &str,
        breakout_room_id: String,
    ) -> Result<(), CoordError> {
        if !self.rooms.contains_key(parent_room_id) {
            return Err(CoordError::ParentRoomNotFound(parent_room_id.to_string()));
        }

        if let Some(existing) = self.rooms.get(&breakout_room_id) {
            // Re-creating the same breakout (possibly by another member of
            // the same parent room) is idempotent; an ID that names an
            // unrelated room is a conflict, not a silent no-op
            if existing.parent.as_deref() == Some(parent_room_id) {
                return Ok(());
            }
            return Err(CoordError::BreakoutIdInUse(breakout_room_id));
        }

        self.create_room(breakout_room_id.clone(), Some(parent_room_id.to_string()))
            .await?;

        info!(
            target: "coord.actor.coordinator",
            parent_room_id = %parent_room_id,
            breakout_room_id = %breakout_room_id,
            "Breakout room created"
        );
        Ok(())
    }

    /// Create a room and register it. The room's worker comes from the
    /// pool round-robin and stays fixed for the room's lifetime.
    async fn create_room(
        &mut self,
        room_id: String,
        parent: Option<String>,
    ) -> Result<(), CoordError> {
        let worker = self.worker_pool.next()?;
        let router = worker.create_router().await?;

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            router,
            self.recording.clone(),
            self.cancel_token.child_token(),
        );

        info!(
            target: "coord.actor.coordinator",
            room_id = %room_id,
            worker_id = %worker.id(),
            breakout = parent.is_some(),
            "Room created"
        );

        self.rooms.insert(
            room_id,
            ManagedRoom {
                handle,
                task_handle,
                parent,
            },
        );
        self.update_room_gauge();
        Ok(())
    }

    /// Remove a room and cascade to its breakouts.
    fn remove_room(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.remove(room_id) {
            room.handle.cancel();
            info!(
                target: "coord.actor.coordinator",
                room_id = %room_id,
                "Room removed"
            );
        }

        let breakout_ids: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.parent.as_deref() == Some(room_id))
            .map(|(id, _)| id.clone())
            .collect();
        for breakout_id in breakout_ids {
            self.remove_room(&breakout_id);
        }

        self.update_room_gauge();
    }

    /// Reap rooms whose actor task has terminated without going through
    /// the removal path.
    fn check_room_health(&mut self) {
        let dead: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, room)| room.task_handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for room_id in dead {
            warn!(
                target: "coord.actor.coordinator",
                room_id = %room_id,
                "Room actor terminated unexpectedly, removing"
            );
            self.remove_room(&room_id);
        }
    }

    fn publish_event(&self, event: RoomEvent) {
        let Some(events_tx) = &self.events_tx else {
            return;
        };
        // Best-effort: the sync layer is advisory
        if let Err(e) = events_tx.try_send(event) {
            warn!(
                target: "coord.actor.coordinator",
                error = %e,
                "Failed to queue room event"
            );
        }
    }

    fn update_room_gauge(&self) {
        #[allow(clippy::cast_precision_loss)]
        let count = self.rooms.len() as f64;
        metrics::gauge!("sc_rooms_active").set(count);
    }

    async fn shutdown_rooms(&mut self, timeout: Duration) {
        let rooms: Vec<(String, ManagedRoom)> = self.rooms.drain().collect();
        for (room_id, room) in rooms {
            room.handle.cancel();
            if tokio::time::timeout(timeout, room.task_handle).await.is_err() {
                warn!(
                    target: "coord.actor.coordinator",
                    room_id = %room_id,
                    "Room did not shut down within timeout"
                );
            }
        }
        self.update_room_gauge();
    }
}
