//! Consumer handles.
//!
//! Consumers are created paused so the receiving client can finish its local
//! setup before traffic flows; forwarding starts only on an explicit
//! [`Consumer::resume`].

use crate::producer::Producer;
use crate::router::MediaKind;
use crate::worker::short_uuid;
use crate::EngineError;

use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

struct ConsumerInner {
    id: String,
    producer_id: String,
    kind: MediaKind,
    rtp_parameters: Value,
    paused: AtomicBool,
    forwarding: AtomicBool,
    closed: AtomicBool,
}

/// A media stream a participant receives from another participant's
/// producer.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    pub(crate) fn new(producer: &Producer, paused: bool) -> Self {
        let id = format!("consumer-{}", short_uuid());
        debug!(
            target: "engine.consumer",
            consumer_id = %id,
            producer_id = %producer.id(),
            paused = paused,
            "Consumer created"
        );
        Self {
            inner: Arc::new(ConsumerInner {
                id,
                producer_id: producer.id().to_string(),
                kind: producer.kind(),
                rtp_parameters: producer.rtp_parameters(),
                paused: AtomicBool::new(paused),
                forwarding: AtomicBool::new(!paused),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Consumer identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Identifier of the producer this consumer receives.
    #[must_use]
    pub fn producer_id(&self) -> &str {
        &self.inner.producer_id
    }

    /// Media kind, inherited from the producer.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        self.inner.kind
    }

    /// RTP parameters for the receiving client.
    #[must_use]
    pub fn rtp_parameters(&self) -> Value {
        self.inner.rtp_parameters.clone()
    }

    /// Whether the consumer is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::SeqCst)
    }

    /// Whether the router is forwarding media to this consumer.
    #[must_use]
    pub fn is_forwarding(&self) -> bool {
        self.inner.forwarding.load(Ordering::SeqCst)
    }

    /// Start forwarding. Fails on a closed consumer.
    pub fn resume(&self) -> Result<(), EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed {
                handle: "consumer",
                id: self.inner.id.clone(),
            });
        }
        self.inner.paused.store(false, Ordering::SeqCst);
        self.inner.forwarding.store(true, Ordering::SeqCst);
        debug!(
            target: "engine.consumer",
            consumer_id = %self.inner.id,
            "Consumer resumed"
        );
        Ok(())
    }

    /// Stop forwarding without closing.
    pub fn pause(&self) {
        self.inner.paused.store(true, Ordering::SeqCst);
        self.inner.forwarding.store(false, Ordering::SeqCst);
    }

    /// Whether the consumer has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Close the consumer. Idempotent; stops forwarding.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.inner.forwarding.store(false, Ordering::SeqCst);
            debug!(
                target: "engine.consumer",
                consumer_id = %self.inner.id,
                "Consumer closed"
            );
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("producer_id", &self.inner.producer_id)
            .field("paused", &self.is_paused())
            .field("closed", &self.is_closed())
            .finish()
    }
}
