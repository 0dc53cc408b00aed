//! Engine worker handles.
//!
//! A [`Worker`] is an opaque reference to one media-engine process. Workers
//! are presumed unrecoverable: when the underlying process reports failure
//! the handle flips to dead and signals its died channel, and the owning
//! coordinator process is expected to exit so a supervisor restarts it.

use crate::router::Router;
use crate::{EngineError, EngineSettings};

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

struct WorkerInner {
    id: String,
    index: usize,
    settings: EngineSettings,
    live: AtomicBool,
    next_port: AtomicU16,
    died_tx: watch::Sender<bool>,
}

/// Handle to one media-engine worker process.
///
/// Cheaply cloneable; all clones observe the same liveness state.
#[derive(Clone)]
pub struct Worker {
    inner: Arc<WorkerInner>,
}

impl Worker {
    /// Launch a worker with the given pool index.
    #[must_use]
    pub fn launch(index: usize, settings: EngineSettings) -> Self {
        let (died_tx, _died_rx) = watch::channel(false);
        let id = format!("worker-{index}-{}", short_uuid());
        let next_port = settings.rtc_min_port;

        info!(
            target: "engine.worker",
            worker_id = %id,
            index = index,
            rtc_min_port = settings.rtc_min_port,
            rtc_max_port = settings.rtc_max_port,
            "Worker launched"
        );

        Self {
            inner: Arc::new(WorkerInner {
                id,
                index,
                settings,
                live: AtomicBool::new(true),
                next_port: AtomicU16::new(next_port),
                died_tx,
            }),
        }
    }

    /// Worker identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Position of this worker in the launch order.
    #[must_use]
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Whether the underlying process is still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Subscribe to the died notification. The channel value becomes `true`
    /// exactly once, when the process reports failure.
    #[must_use]
    pub fn died(&self) -> watch::Receiver<bool> {
        self.inner.died_tx.subscribe()
    }

    /// Record that the underlying process has died.
    ///
    /// Idempotent. Routers bound to this worker become unusable; the owning
    /// process decides whether that is fatal.
    pub fn fail(&self) {
        if self.inner.live.swap(false, Ordering::SeqCst) {
            warn!(
                target: "engine.worker",
                worker_id = %self.inner.id,
                "Worker died"
            );
            let _ = self.inner.died_tx.send(true);
        }
    }

    /// Create a router bound to this worker.
    pub async fn create_router(&self) -> Result<Router, EngineError> {
        if !self.is_live() {
            return Err(EngineError::WorkerDied(self.inner.id.clone()));
        }
        Ok(Router::new(self.clone()))
    }

    /// Allocate the next media port from the configured range, wrapping.
    pub(crate) fn allocate_port(&self) -> u16 {
        let min = self.inner.settings.rtc_min_port;
        let max = self.inner.settings.rtc_max_port;
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        if port >= max {
            self.inner.next_port.store(min, Ordering::Relaxed);
        }
        port.clamp(min, max)
    }

    /// Address announced to remote peers, falling back to the wildcard
    /// listen address.
    pub(crate) fn announced_ip(&self) -> String {
        self.inner
            .settings
            .announced_ip
            .clone()
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.inner.id)
            .field("index", &self.inner.index)
            .field("live", &self.is_live())
            .finish()
    }
}

pub(crate) fn short_uuid() -> String {
    let full = uuid::Uuid::new_v4().simple().to_string();
    full.get(..8).unwrap_or_default().to_string()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_starts_live() {
        let worker = Worker::launch(0, EngineSettings::default());
        assert!(worker.is_live());
        assert_eq!(worker.index(), 0);
        assert!(worker.id().starts_with("worker-0-"));
    }

    #[tokio::test]
    async fn test_worker_fail_flips_liveness_and_notifies() {
        let worker = Worker::launch(1, EngineSettings::default());
        let mut died = worker.died();
        assert!(!*died.borrow());

        worker.fail();
        assert!(!worker.is_live());

        died.changed().await.unwrap();
        assert!(*died.borrow());

        // Idempotent
        worker.fail();
        assert!(!worker.is_live());
    }

    #[tokio::test]
    async fn test_dead_worker_refuses_router_creation() {
        let worker = Worker::launch(0, EngineSettings::default());
        worker.fail();

        let result = worker.create_router().await;
        assert!(matches!(result, Err(EngineError::WorkerDied(_))));
    }

    #[tokio::test]
    async fn test_port_allocation_stays_in_range() {
        let settings = EngineSettings {
            rtc_min_port: 40000,
            rtc_max_port: 40003,
            announced_ip: None,
        };
        let worker = Worker::launch(0, settings);

        for _ in 0..10 {
            let port = worker.allocate_port();
            assert!((40000..=40003).contains(&port));
        }
    }
}
