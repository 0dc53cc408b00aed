//! Engine worker pool.
//!
//! Workers are launched once at startup and placed in a fixed pool. Rooms
//! draw a worker with [`WorkerPool::next`], a round-robin over the launch
//! order, so rooms spread evenly across workers regardless of room lifetime.
//!
//! Worker death is treated as unrecoverable: [`WorkerPool::watch_failure`]
//! resolves when any worker dies and the process is expected to exit so a
//! supervisor restarts it with a fresh pool.

use crate::errors::CoordError;

use futures::future::select_all;
use media_engine::{launch_workers, EngineSettings, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, info};

/// Fixed pool of engine workers with round-robin assignment.
pub struct WorkerPool {
    workers: Vec<Worker>,
    cursor: AtomicUsize,
}

impl WorkerPool {
    /// Launch `count` workers and build the pool.
    ///
    /// # Errors
    ///
    /// Returns `CoordError::NoWorkersAvailable` if `count` is zero; a
    /// coordinator without workers cannot host any room.
    pub fn launch(count: usize, settings: &EngineSettings) -> Result<Self, CoordError> {
        if count == 0 {
            error!(target: "coord.workers", "Refusing to start with zero workers");
            return Err(CoordError::NoWorkersAvailable);
        }

        let workers = launch_workers(count, settings);
        info!(
            target: "coord.workers",
            count = workers.len(),
            "Worker pool ready"
        );

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Number of workers in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Next worker in round-robin order.
    ///
    /// Dead workers are skipped; after a full lap with no live worker the
    /// pool reports exhaustion. In practice worker death tears the process
    /// down before this path matters.
    pub fn next(&self) -> Result<Worker, CoordError> {
        let len = self.workers.len();
        for _ in 0..len {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            if let Some(worker) = self.workers.get(index) {
                if worker.is_live() {
                    return Ok(worker.clone());
                }
            }
        }
        Err(CoordError::NoWorkersAvailable)
    }

    /// Resolve when any worker in the pool dies, yielding its ID.
    pub async fn watch_failure(&self) -> String {
        let watchers = self
            .workers
            .iter()
            .map(|worker| {
                let id = worker.id().to_string();
                let mut died = worker.died();
                Box::pin(async move {
                    // The channel value flips to true exactly once. A closed
                    // channel means the worker handle was dropped, which only
                    // happens at teardown; treat it as death too.
                    while !*died.borrow() {
                        if died.changed().await.is_err() {
                            break;
                        }
                    }
                    id
                })
            })
            .collect::<Vec<_>>();

        let (worker_id, _, _) = select_all(watchers).await;
        error!(
            target: "coord.workers",
            worker_id = %worker_id,
            "Worker died"
        );
        worker_id
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("live", &self.workers.iter().filter(|w| w.is_live()).count())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(count: usize) -> WorkerPool {
        WorkerPool::launch(count, &EngineSettings::default()).expect("pool should launch")
    }

    #[test]
    fn test_zero_workers_is_fatal() {
        let result = WorkerPool::launch(0, &EngineSettings::default());
        assert!(matches!(result, Err(CoordError::NoWorkersAvailable)));
    }

    #[tokio::test]
    async fn test_round_robin_cycles_through_all_workers() {
        let pool = pool(3);

        let indexes: Vec<usize> = (0..6)
            .map(|_| pool.next().expect("pool has live workers").index())
            .collect();
        assert_eq!(indexes, vec![0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_round_robin_distribution_is_even() {
        let pool = pool(4);
        let mut counts = [0usize; 4];

        for _ in 0..40 {
            let worker = pool.next().expect("pool has live workers");
            if let Some(slot) = counts.get_mut(worker.index()) {
                *slot += 1;
            }
        }
        assert_eq!(counts, [10, 10, 10, 10]);
    }

    #[tokio::test]
    async fn test_dead_workers_are_skipped() {
        let pool = pool(3);

        // Kill worker 1; assignment should only hit 0 and 2
        for worker in &pool.workers {
            if worker.index() == 1 {
                worker.fail();
            }
        }

        for _ in 0..10 {
            let worker = pool.next().expect("two live workers remain");
            assert_ne!(worker.index(), 1);
        }
    }

    #[tokio::test]
    async fn test_all_dead_reports_exhaustion() {
        let pool = pool(2);
        for worker in &pool.workers {
            worker.fail();
        }

        assert!(matches!(pool.next(), Err(CoordError::NoWorkersAvailable)));
    }

    #[tokio::test]
    async fn test_watch_failure_resolves_on_death() {
        let pool = pool(2);
        let victim_id = pool.workers.first().expect("pool has workers").id().to_string();

        let watch = pool.watch_failure();
        tokio::pin!(watch);

        // Not resolved while all workers are live
        let poll = tokio::time::timeout(Duration::from_millis(20), &mut watch).await;
        assert!(poll.is_err());

        pool.workers.first().expect("pool has workers").fail();
        let died_id = tokio::time::timeout(Duration::from_secs(1), &mut watch)
            .await
            .expect("watch should resolve after failure");
        assert_eq!(died_id, victim_id);
    }
}
