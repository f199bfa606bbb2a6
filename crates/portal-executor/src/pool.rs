//! Bounded worker pool.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Maximum concurrently running tasks.
    pub size: usize,
    /// Tasks currently holding a slot.
    pub active: usize,
    /// Tasks waiting for a slot.
    pub queued: usize,
    /// Tasks finished since creation.
    pub completed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
    completed: AtomicUsize,
}

#[derive(Clone, Copy)]
enum Slot {
    Queued,
    Active,
}

/// Holds one count of a slot; dropping it (also on abort) gives it back.
struct CounterGuard {
    counters: Arc<Counters>,
    slot: Slot,
}

impl CounterGuard {
    fn acquire(counters: &Arc<Counters>, slot: Slot) -> Self {
        let guard = Self {
            counters: Arc::clone(counters),
            slot,
        };
        guard.counter().fetch_add(1, Ordering::SeqCst);
        guard
    }

    fn counter(&self) -> &AtomicUsize {
        match self.slot {
            Slot::Queued => &self.counters.queued,
            Slot::Active => &self.counters.active,
        }
    }
}

impl Drop for CounterGuard {
    fn drop(&mut self) {
        self.counter().fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runs tasks on the tokio runtime with at most `size` in flight.
///
/// Tasks beyond the limit queue on a semaphore; completion order is not
/// guaranteed.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: usize,
    semaphore: Arc<Semaphore>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Create a pool. A size of 0 is treated as 1.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Submit a task. Dropping or aborting the handle cancels a queued task.
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        let counters = Arc::clone(&self.counters);
        let queued = CounterGuard::acquire(&counters, Slot::Queued);

        tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails on shutdown.
            let _permit = semaphore.acquire_owned().await.ok();
            drop(queued);

            let active = CounterGuard::acquire(&counters, Slot::Active);
            let output = task.await;
            drop(active);

            counters.completed.fetch_add(1, Ordering::SeqCst);
            output
        })
    }

    /// Current occupancy.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.size,
            active: self.counters.active.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
        }
    }

    /// Maximum concurrently running tasks.
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_tasks_and_counts_completion() {
        let pool = WorkerPool::new(2);
        let handles: Vec<_> = (0..4).map(|i| pool.spawn(async move { i * 2 })).collect();

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results.sort();
        assert_eq!(results, vec![0, 2, 4, 6]);

        let stats = pool.stats();
        assert_eq!(stats.completed, 4);
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_aborted_task_releases_counters() {
        let pool = WorkerPool::new(1);
        let blocker = pool.spawn(tokio::time::sleep(Duration::from_secs(5)));
        tokio::task::yield_now().await;

        blocker.abort();
        let _ = blocker.await;
        let stats = pool.stats();
        assert_eq!(stats.active, 0);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
