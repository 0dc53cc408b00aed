//! Actor system for the Session Coordinator.
//!
//! Two-level hierarchy:
//! - `CoordinatorActor` (singleton): owns the room registry, creates rooms
//!   on first join and removes them when they empty
//! - `RoomActor` (per room): owns all state for one room
//!
//! Room lookup and creation are serialized through the coordinator's
//! mailbox, so concurrent joins to the same new room cannot race.

pub mod coordinator;
pub mod messages;
pub mod room;

pub use coordinator::CoordinatorActorHandle;
pub use messages::{
    ConsumeResult, CoordinatorMessage, JoinResult, Notification, ProducerSummary, RecordingInfo,
    RoomMessage, RoomState, TransportOptions,
};
pub use room::RoomActorHandle;
