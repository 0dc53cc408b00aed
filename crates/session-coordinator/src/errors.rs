//! Session Coordinator error types.
//!
//! Error types map to signaling error codes for client responses. Internal
//! details are logged server-side but not exposed to clients.

use media_engine::EngineError;
use thiserror::Error;

/// Session Coordinator error type.
///
/// Maps to signaling error codes:
/// - `RoomNotFound`, `ParentRoomNotFound`, `ParticipantNotFound`,
///   `TransportNotFound`, `ProducerNotFound`, `ConsumerNotFound`:
///   `NOT_FOUND` (4)
/// - `CapabilityMismatch`, `InvalidTransportState`, `BreakoutIdInUse`:
///   `BAD_REQUEST` (1)
/// - `NoWorkersAvailable`: `RESOURCE_EXHAUSTED` (7)
/// - `WorkerFailure`, Redis, Config, Internal: `INTERNAL_ERROR` (6)
/// - `RecordingFailed`: `BEST_EFFORT_FAILED` (8)
#[derive(Debug, Error)]
pub enum CoordError {
    /// Room does not exist on this instance.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Breakout creation referenced a parent room that does not exist.
    #[error("Parent room not found: {0}")]
    ParentRoomNotFound(String),

    /// Breakout ID already names an unrelated room.
    #[error("Breakout ID in use: {0}")]
    BreakoutIdInUse(String),

    /// Participant is not joined to the room.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Transport handle does not exist for the participant.
    #[error("Transport not found: {0}")]
    TransportNotFound(String),

    /// Producer does not exist in the room.
    #[error("Producer not found: {0}")]
    ProducerNotFound(String),

    /// Consumer does not exist for the participant.
    #[error("Consumer not found: {0}")]
    ConsumerNotFound(String),

    /// Client capabilities cannot consume the requested producer.
    #[error("Capability mismatch for producer {0}")]
    CapabilityMismatch(String),

    /// Transport is in the wrong state for the operation.
    #[error("Invalid transport state: {0}")]
    InvalidTransportState(String),

    /// No live engine workers to place a room on.
    #[error("No workers available")]
    NoWorkersAvailable,

    /// An engine worker died while serving the room.
    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    /// Recording pipeline error (best-effort, room stays up).
    #[error("Recording failed: {0}")]
    RecordingFailed(String),

    /// Redis operation failed.
    #[error("Redis error: {0}")]
    Redis(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoordError {
    /// Returns the signaling error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            CoordError::CapabilityMismatch(_)
            | CoordError::InvalidTransportState(_)
            | CoordError::BreakoutIdInUse(_) => 1, // BAD_REQUEST
            CoordError::RoomNotFound(_)
            | CoordError::ParentRoomNotFound(_)
            | CoordError::ParticipantNotFound(_)
            | CoordError::TransportNotFound(_)
            | CoordError::ProducerNotFound(_)
            | CoordError::ConsumerNotFound(_) => 4, // NOT_FOUND
            CoordError::WorkerFailure(_)
            | CoordError::Redis(_)
            | CoordError::Config(_)
            | CoordError::Internal(_) => 6, // INTERNAL_ERROR
            CoordError::NoWorkersAvailable => 7, // RESOURCE_EXHAUSTED
            CoordError::RecordingFailed(_) => 8, // BEST_EFFORT_FAILED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            CoordError::RoomNotFound(_) => "Room not found".to_string(),
            CoordError::ParentRoomNotFound(_) => "Parent room not found".to_string(),
            CoordError::BreakoutIdInUse(_) => {
                "Breakout ID already names an existing room".to_string()
            }
            CoordError::ParticipantNotFound(_) => "Participant not found".to_string(),
            CoordError::TransportNotFound(_) => "Transport not found".to_string(),
            CoordError::ProducerNotFound(_) => "Producer not found".to_string(),
            CoordError::ConsumerNotFound(_) => "Consumer not found".to_string(),
            CoordError::CapabilityMismatch(_) => {
                "Cannot consume this producer with the provided capabilities".to_string()
            }
            CoordError::InvalidTransportState(_) => {
                "Transport is not in a valid state for this operation".to_string()
            }
            CoordError::NoWorkersAvailable => {
                "Server is at capacity, please try again".to_string()
            }
            CoordError::RecordingFailed(_) => "Recording could not be started".to_string(),
            CoordError::WorkerFailure(_) => "Room unavailable".to_string(),
            CoordError::Redis(_) | CoordError::Config(_) | CoordError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<EngineError> for CoordError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::WorkerDied(id) => CoordError::WorkerFailure(id),
            EngineError::ProducerNotFound(id) => CoordError::ProducerNotFound(id),
            EngineError::CannotConsume(id) => CoordError::CapabilityMismatch(id),
            EngineError::InvalidState { .. } | EngineError::WrongDirection { .. } => {
                CoordError::InvalidTransportState(err.to_string())
            }
            EngineError::Closed { .. } => CoordError::InvalidTransportState(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        // Not found -> 4
        assert_eq!(CoordError::RoomNotFound("r1".to_string()).error_code(), 4);
        assert_eq!(
            CoordError::ParentRoomNotFound("r1".to_string()).error_code(),
            4
        );
        assert_eq!(
            CoordError::ParticipantNotFound("u1".to_string()).error_code(),
            4
        );
        assert_eq!(
            CoordError::ProducerNotFound("p1".to_string()).error_code(),
            4
        );

        // Bad request -> 1
        assert_eq!(
            CoordError::CapabilityMismatch("p1".to_string()).error_code(),
            1
        );
        assert_eq!(
            CoordError::InvalidTransportState("closed".to_string()).error_code(),
            1
        );
        assert_eq!(CoordError::BreakoutIdInUse("b1".to_string()).error_code(), 1);

        // Resource exhausted -> 7
        assert_eq!(CoordError::NoWorkersAvailable.error_code(), 7);

        // Internal -> 6
        assert_eq!(
            CoordError::WorkerFailure("worker-0".to_string()).error_code(),
            6
        );
        assert_eq!(
            CoordError::Redis("conn refused".to_string()).error_code(),
            6
        );

        // Best-effort -> 8
        assert_eq!(
            CoordError::RecordingFailed("spawn failed".to_string()).error_code(),
            8
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let redis_err = CoordError::Redis("connection refused at 10.0.0.5:6379".to_string());
        assert!(!redis_err.client_message().contains("10.0.0.5"));
        assert_eq!(redis_err.client_message(), "An internal error occurred");

        let worker_err = CoordError::WorkerFailure("worker-3-abc123".to_string());
        assert!(!worker_err.client_message().contains("worker-3"));
    }

    #[test]
    fn test_engine_error_conversion() {
        let err: CoordError = EngineError::WorkerDied("worker-1".to_string()).into();
        assert!(matches!(err, CoordError::WorkerFailure(_)));
        assert_eq!(err.error_code(), 6);

        let err: CoordError = EngineError::CannotConsume("producer-ab".to_string()).into();
        assert!(matches!(err, CoordError::CapabilityMismatch(_)));
        assert_eq!(err.error_code(), 1);
    }
}
