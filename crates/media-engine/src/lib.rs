//! Media engine boundary.
//!
//! The forwarding plane (ICE/DTLS negotiation, RTP/RTCP routing, codec
//! handling) lives in external worker processes. This crate defines the
//! handle types the session coordinator drives and the small operation set
//! those workers expose:
//!
//! - [`Worker`] - one engine process; liveness flag plus a died notification
//! - [`Router`] - per-room routing capability bound to one worker
//! - [`WebRtcTransport`] - a directional client path with a
//!   `new -> connecting -> connected -> closed` state machine
//! - [`PlainTransport`] - a local relay endpoint (recording)
//! - [`Producer`] / [`Consumer`] - media streams into and out of a router
//!
//! Each handle tracks identity, capability and lifecycle state; none of them
//! touch media packets. Close operations are idempotent throughout.

pub mod consumer;
pub mod producer;
pub mod router;
pub mod transport;
pub mod worker;

pub use consumer::Consumer;
pub use producer::Producer;
pub use router::{MediaKind, Router, RtpCapabilities, RtpCodecCapability};
pub use transport::{PlainTransport, TransportDirection, TransportState, WebRtcTransport};
pub use worker::Worker;

use serde_json::json;
use thiserror::Error;

/// Errors surfaced by engine handles.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker backing this handle has died.
    #[error("worker {0} has died")]
    WorkerDied(String),

    /// Operation attempted against a closed handle.
    #[error("{handle} {id} is closed")]
    Closed { handle: &'static str, id: String },

    /// Handle is in the wrong state for the operation.
    #[error("transport {id} cannot {operation} in state {state:?}")]
    InvalidState {
        id: String,
        operation: &'static str,
        state: TransportState,
    },

    /// Transport direction does not allow the operation.
    #[error("transport {id} is a {direction} transport, cannot {operation}")]
    WrongDirection {
        id: String,
        direction: TransportDirection,
        operation: &'static str,
    },

    /// Referenced producer does not exist on the router.
    #[error("producer {0} not found on router")]
    ProducerNotFound(String),

    /// Capability set cannot consume the referenced producer.
    #[error("capabilities cannot consume producer {0}")]
    CannotConsume(String),
}

/// Resource-allocation settings for engine workers.
///
/// These affect only port allocation and the addresses handed to clients
/// during transport negotiation, never protocol shape.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Lowest RTC media port a worker may allocate.
    pub rtc_min_port: u16,
    /// Highest RTC media port a worker may allocate.
    pub rtc_max_port: u16,
    /// Address announced to clients in ICE candidates, if the listen
    /// address is not directly reachable.
    pub announced_ip: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            rtc_min_port: 20000,
            rtc_max_port: 29999,
            announced_ip: None,
        }
    }
}

/// The codec set every router negotiates.
#[must_use]
pub fn default_rtp_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: vec![
            RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                clock_rate: 48000,
                channels: Some(2),
                parameters: json!({}),
            },
            RtpCodecCapability {
                kind: MediaKind::Video,
                mime_type: "video/VP8".to_string(),
                clock_rate: 90000,
                channels: None,
                parameters: json!({}),
            },
            RtpCodecCapability {
                kind: MediaKind::Video,
                mime_type: "video/H264".to_string(),
                clock_rate: 90000,
                channels: None,
                parameters: json!({
                    "packetization-mode": 1,
                    "profile-level-id": "42e01f",
                    "level-asymmetry-allowed": 1,
                }),
            },
        ],
    }
}

/// Launch `count` engine workers with the given settings.
pub fn launch_workers(count: usize, settings: &EngineSettings) -> Vec<Worker> {
    (0..count)
        .map(|index| Worker::launch(index, settings.clone()))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capabilities_cover_both_kinds() {
        let caps = default_rtp_capabilities();
        assert!(caps.codecs.iter().any(|c| c.kind == MediaKind::Audio));
        assert!(caps.codecs.iter().any(|c| c.kind == MediaKind::Video));
    }

    #[test]
    fn test_launch_workers_indexes_in_order() {
        let workers = launch_workers(3, &EngineSettings::default());
        let indexes: Vec<usize> = workers.iter().map(Worker::index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert!(workers.iter().all(Worker::is_live));
    }

    #[test]
    fn test_settings_default_port_range() {
        let settings = EngineSettings::default();
        assert!(settings.rtc_min_port < settings.rtc_max_port);
        assert!(settings.announced_ip.is_none());
    }
}
