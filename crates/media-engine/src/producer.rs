//! Producer handles.

use crate::router::MediaKind;
use crate::worker::short_uuid;

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct ProducerInner {
    id: String,
    kind: MediaKind,
    rtp_parameters: Value,
    paused: AtomicBool,
    closed: AtomicBool,
}

/// A media stream a participant sends into a room's router.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    pub(crate) fn new(kind: MediaKind, rtp_parameters: Value) -> Self {
        let id = format!("producer-{}", short_uuid());
        debug!(
            target: "engine.producer",
            producer_id = %id,
            kind = %kind,
            "Producer created"
        );
        Self {
            inner: Arc::new(ProducerInner {
                id,
                kind,
                rtp_parameters,
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Producer identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Media kind of the stream.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// The RTP parameters the producer was created with.
    #[must_use]
    pub fn rtp_parameters(&self) -> Value {
        self.inner.rtp_parameters.clone()
    }

    /// Whether the producer is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Pause the stream.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
    }

    /// Resume the stream.
    pub fn resume(&self) {
        self.inner.paused.store(false, Ordering::SeqCst);
    }

    /// Whether the producer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the producer. Idempotent.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            debug!(
                target: "engine.producer",
                producer_id = %self.inner.id,
                "Producer closed"
            );
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}
