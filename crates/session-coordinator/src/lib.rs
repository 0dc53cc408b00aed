//! Session Coordinator Service Library
//!
//! This library provides the core functionality for the Session
//! Coordinator - a stateful WebSocket signaling server responsible for:
//!
//! - Room lifecycle: lazy creation on first join, removal when empty
//! - Participant session state: transports, producers, consumers
//! - Engine worker pool with round-robin room placement
//! - Chat and live-caption relay between participants
//! - Server-side recording via external process pipelines
//! - Breakout rooms attached to a parent room
//! - Cross-instance room sync over Redis pub/sub
//!
//! # Architecture
//!
//! The coordinator uses an actor model hierarchy:
//!
//! ```text
//! CoordinatorActor (singleton per instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per active room)
//!         ├── owns one router on one engine worker
//!         └── owns all participant state for the room
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single-writer rooms**: every room mutation flows through the room's
//!   mailbox, so no room state needs locks
//! - **Serialized registry**: room creation and empty-room removal both run
//!   inside the coordinator actor, closing the get-or-create race
//! - **Fail-fast workers**: a dead engine worker terminates the process so
//!   a supervisor restarts it with a clean pool
//! - **Advisory sync**: the Redis layer only warms a peer-room cache; no
//!   operation depends on it
//!
//! # Modules
//!
//! - [`actors`] - Actor model implementation
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with signaling error codes
//! - [`gateway`] - WebSocket signaling protocol
//! - [`workers`] - Engine worker pool
//! - [`recording`] - Recording process management
//! - [`scalesync`] - Cross-instance room events

pub mod actors;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod observability;
pub mod recording;
pub mod scalesync;
pub mod server;
pub mod workers;
