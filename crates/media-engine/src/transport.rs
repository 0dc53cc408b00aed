//! Client and relay transports.
//!
//! A [`WebRtcTransport`] models one negotiated network path between a client
//! and the engine. State machine:
//!
//! ```text
//! new -> connecting -> connected -> closed
//! ```
//!
//! `closed` is terminal and reachable from any state via explicit close or
//! owning-session teardown; close is idempotent.

use crate::consumer::Consumer;
use crate::producer::Producer;
use crate::router::{MediaKind, Router, RtpCapabilities};
use crate::worker::short_uuid;
use crate::EngineError;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Direction of a client transport, from the client's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

impl fmt::Display for TransportDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportDirection::Send => write!(f, "send"),
            TransportDirection::Recv => write!(f, "recv"),
        }
    }
}

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Closed,
}

struct WebRtcTransportInner {
    id: String,
    direction: TransportDirection,
    router: Router,
    state: Mutex<TransportState>,
    ice_parameters: Value,
    ice_candidates: Value,
    dtls_parameters: Value,
}

/// A negotiated network path between a client and the engine, directional.
#[derive(Clone)]
pub struct WebRtcTransport {
    inner: Arc<WebRtcTransportInner>,
}

impl WebRtcTransport {
    pub(crate) fn new(router: Router, direction: TransportDirection) -> Self {
        let id = format!("transport-{}", short_uuid());
        let port = router.worker().allocate_port();
        let ip = router.worker().announced_ip();

        debug!(
            target: "engine.transport",
            transport_id = %id,
            router_id = %router.id(),
            direction = %direction,
            "WebRTC transport created"
        );

        Self {
            inner: Arc::new(WebRtcTransportInner {
                id,
                direction,
                router,
                state: Mutex::new(TransportState::New),
                ice_parameters: json!({
                    "usernameFragment": short_uuid(),
                    "password": short_uuid(),
                    "iceLite": true,
                }),
                ice_candidates: json!([{
                    "foundation": "udpcandidate",
                    "ip": ip,
                    "port": port,
                    "protocol": "udp",
                    "type": "host",
                }]),
                dtls_parameters: json!({
                    "role": "auto",
                    "fingerprints": [{
                        "algorithm": "sha-256",
                        "value": short_uuid(),
                    }],
                }),
            }),
        }
    }

    /// Transport identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Transport direction.
    #[must_use]
    pub fn direction(&self) -> TransportDirection {
        self.inner.direction
    }

    /// Current connection state.
    pub async fn state(&self) -> TransportState {
        *self.inner.state.lock().await
    }

    /// ICE parameters for the client side of the negotiation.
    #[must_use]
    pub fn ice_parameters(&self) -> Value {
        self.inner.ice_parameters.clone()
    }

    /// ICE candidates for the client side of the negotiation.
    #[must_use]
    pub fn ice_candidates(&self) -> Value {
        self.inner.ice_candidates.clone()
    }

    /// Local DTLS parameters.
    #[must_use]
    pub fn dtls_parameters(&self) -> Value {
        self.inner.dtls_parameters.clone()
    }

    /// Complete the DTLS handshake with the client's parameters.
    ///
    /// Transitions `new -> connecting -> connected`. Fails on a closed
    /// transport; re-connecting an already connected transport is a no-op.
    pub async fn connect(&self, _dtls_parameters: Value) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock().await;
        match *state {
            TransportState::New | TransportState::Connecting => {
                *state = TransportState::Connecting;
                // Handshake completes synchronously in this model.
                *state = TransportState::Connected;
                debug!(
                    target: "engine.transport",
                    transport_id = %self.inner.id,
                    "Transport connected"
                );
                Ok(())
            }
            TransportState::Connected => Ok(()),
            TransportState::Closed => Err(EngineError::InvalidState {
                id: self.inner.id.clone(),
                operation: "connect",
                state: TransportState::Closed,
            }),
        }
    }

    /// Send a media stream into the router over this transport.
    ///
    /// Requires a send-direction transport in `connected` state.
    pub async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: Value,
    ) -> Result<Producer, EngineError> {
        if self.inner.direction != TransportDirection::Send {
            return Err(EngineError::WrongDirection {
                id: self.inner.id.clone(),
                direction: self.inner.direction,
                operation: "produce",
            });
        }

        let state = *self.inner.state.lock().await;
        if state != TransportState::Connected {
            return Err(EngineError::InvalidState {
                id: self.inner.id.clone(),
                operation: "produce",
                state,
            });
        }

        let producer = Producer::new(kind, rtp_parameters);
        self.inner.router.register_producer(producer.clone()).await;
        Ok(producer)
    }

    /// Receive another participant's producer over this transport.
    ///
    /// The router must confirm consumable capability first; the consumer is
    /// created in the requested pause state.
    pub async fn consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Consumer, EngineError> {
        if self.inner.direction != TransportDirection::Recv {
            return Err(EngineError::WrongDirection {
                id: self.inner.id.clone(),
                direction: self.inner.direction,
                operation: "consume",
            });
        }

        let state = *self.inner.state.lock().await;
        if state == TransportState::Closed {
            return Err(EngineError::Closed {
                handle: "transport",
                id: self.inner.id.clone(),
            });
        }

        if !self.inner.router.can_consume(producer_id, capabilities).await {
            return Err(EngineError::CannotConsume(producer_id.to_string()));
        }

        let producer = self
            .inner
            .router
            .producer(producer_id)
            .await
            .ok_or_else(|| EngineError::ProducerNotFound(producer_id.to_string()))?;

        Ok(Consumer::new(&producer, paused))
    }

    /// Close the transport. Idempotent; terminal.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if *state != TransportState::Closed {
            *state = TransportState::Closed;
            debug!(
                target: "engine.transport",
                transport_id = %self.inner.id,
                "Transport closed"
            );
        }
    }
}

impl fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcTransport")
            .field("id", &self.inner.id)
            .field("direction", &self.inner.direction)
            .finish()
    }
}

struct PlainTransportInner {
    id: String,
    router: Router,
    ip: String,
    port: u16,
    closed: Mutex<bool>,
}

/// A relay transport terminating in the local process rather than a remote
/// peer. Used to feed recorded media to an external capture process.
#[derive(Clone)]
pub struct PlainTransport {
    inner: Arc<PlainTransportInner>,
}

impl PlainTransport {
    pub(crate) fn new(router: Router) -> Self {
        let id = format!("plain-{}", short_uuid());
        let port = router.worker().allocate_port();
        let ip = router.worker().announced_ip();

        debug!(
            target: "engine.transport",
            transport_id = %id,
            router_id = %router.id(),
            port = port,
            "Plain transport created"
        );

        Self {
            inner: Arc::new(PlainTransportInner {
                id,
                router,
                ip,
                port,
                closed: Mutex::new(false),
            }),
        }
    }

    /// Transport identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Local tuple the relay listens on.
    #[must_use]
    pub fn tuple(&self) -> (String, u16) {
        (self.inner.ip.clone(), self.inner.port)
    }

    /// Consume a producer into the local relay.
    pub async fn consume(
        &self,
        producer_id: &str,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Consumer, EngineError> {
        if *self.inner.closed.lock().await {
            return Err(EngineError::Closed {
                handle: "plain transport",
                id: self.inner.id.clone(),
            });
        }

        if !self.inner.router.can_consume(producer_id, capabilities).await {
            return Err(EngineError::CannotConsume(producer_id.to_string()));
        }

        let producer = self
            .inner
            .router
            .producer(producer_id)
            .await
            .ok_or_else(|| EngineError::ProducerNotFound(producer_id.to_string()))?;

        Ok(Consumer::new(&producer, paused))
    }

    /// Close the relay. Idempotent.
    pub async fn close(&self) {
        let mut closed = self.inner.closed.lock().await;
        if !*closed {
            *closed = true;
            debug!(
                target: "engine.transport",
                transport_id = %self.inner.id,
                "Plain transport closed"
            );
        }
    }
}

impl fmt::Debug for PlainTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainTransport")
            .field("id", &self.inner.id)
            .field("port", &self.inner.port)
            .finish()
    }
}
