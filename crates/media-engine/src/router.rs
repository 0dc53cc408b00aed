//! Routers and the negotiable capability set.
//!
//! A [`Router`] is the per-room routing capability, bound to exactly one
//! worker. It owns the registry of producers currently routable and answers
//! the `can_consume` capability check consumers are gated on.

use crate::producer::Producer;
use crate::transport::{PlainTransport, TransportDirection, WebRtcTransport};
use crate::worker::{short_uuid, Worker};
use crate::{default_rtp_capabilities, EngineError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Media kind of a stream or codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One negotiable codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// The set of codecs/parameters an endpoint can negotiate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpCapabilities {
    pub codecs: Vec<RtpCodecCapability>,
}

impl RtpCapabilities {
    /// Whether the set contains at least one codec of the given kind.
    #[must_use]
    pub fn supports_kind(&self, kind: MediaKind) -> bool {
        self.codecs.iter().any(|codec| codec.kind == kind)
    }
}

struct RouterInner {
    id: String,
    worker: Worker,
    capabilities: RtpCapabilities,
    producers: Mutex<HashMap<String, Producer>>,
}

/// Per-room routing capability bound to one worker.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub(crate) fn new(worker: Worker) -> Self {
        let id = format!("router-{}", short_uuid());
        debug!(
            target: "engine.router",
            router_id = %id,
            worker_id = %worker.id(),
            "Router created"
        );
        Self {
            inner: Arc::new(RouterInner {
                id,
                worker,
                capabilities: default_rtp_capabilities(),
                producers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Router identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The worker this router is bound to.
    #[must_use]
    pub fn worker(&self) -> &Worker {
        &self.inner.worker
    }

    /// The codec set clients negotiate against.
    #[must_use]
    pub fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.capabilities.clone()
    }

    /// Create a directional client transport on this router.
    pub async fn create_webrtc_transport(
        &self,
        direction: TransportDirection,
    ) -> Result<WebRtcTransport, EngineError> {
        if !self.inner.worker.is_live() {
            return Err(EngineError::WorkerDied(self.inner.worker.id().to_string()));
        }
        Ok(WebRtcTransport::new(self.clone(), direction))
    }

    /// Create a local relay transport (terminates in this process, not a
    /// remote peer).
    pub async fn create_plain_transport(&self) -> Result<PlainTransport, EngineError> {
        if !self.inner.worker.is_live() {
            return Err(EngineError::WorkerDied(self.inner.worker.id().to_string()));
        }
        Ok(PlainTransport::new(self.clone()))
    }

    /// Capability check gating consumer creation: the producer must exist,
    /// be open, and the capabilities must carry a codec of its kind.
    pub async fn can_consume(&self, producer_id: &str, capabilities: &RtpCapabilities) -> bool {
        let producers = self.inner.producers.lock().await;
        match producers.get(producer_id) {
            Some(producer) => !producer.is_closed() && capabilities.supports_kind(producer.kind()),
            None => false,
        }
    }

    pub(crate) async fn register_producer(&self, producer: Producer) {
        let mut producers = self.inner.producers.lock().await;
        producers.insert(producer.id().to_string(), producer);
    }

    pub(crate) async fn producer(&self, producer_id: &str) -> Option<Producer> {
        let producers = self.inner.producers.lock().await;
        producers.get(producer_id).cloned()
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("id", &self.inner.id)
            .field("worker", &self.inner.worker.id())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::EngineSettings;

    fn test_worker() -> Worker {
        Worker::launch(0, EngineSettings::default())
    }

    #[tokio::test]
    async fn test_router_capabilities_match_defaults() {
        let router = test_worker().create_router().await.unwrap();
        let caps = router.rtp_capabilities();
        assert!(caps.supports_kind(MediaKind::Audio));
        assert!(caps.supports_kind(MediaKind::Video));
    }

    #[tokio::test]
    async fn test_can_consume_unknown_producer_is_false() {
        let router = test_worker().create_router().await.unwrap();
        let caps = router.rtp_capabilities();
        assert!(!router.can_consume("no-such-producer", &caps).await);
    }

    #[tokio::test]
    async fn test_transport_creation_fails_on_dead_worker() {
        let worker = test_worker();
        let router = worker.create_router().await.unwrap();
        worker.fail();

        let result = router
            .create_webrtc_transport(TransportDirection::Send)
            .await;
        assert!(matches!(result, Err(EngineError::WorkerDied(_))));
    }

    #[test]
    fn test_capabilities_serde_camel_case() {
        let caps = default_rtp_capabilities();
        let json = serde_json::to_string(&caps).unwrap();
        assert!(json.contains("\"mimeType\":\"audio/opus\""));
        assert!(json.contains("\"clockRate\":48000"));
        assert!(json.contains("\"kind\":\"audio\""));

        let parsed: RtpCapabilities = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, caps);
    }

    #[test]
    fn test_supports_kind_filters_codecs() {
        let audio_only = RtpCapabilities {
            codecs: default_rtp_capabilities()
                .codecs
                .into_iter()
                .filter(|c| c.kind == MediaKind::Audio)
                .collect(),
        };
        assert!(audio_only.supports_kind(MediaKind::Audio));
        assert!(!audio_only.supports_kind(MediaKind::Video));
    }
}
