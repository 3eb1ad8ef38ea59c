//! One FIFO worker pool per priority band.
//!
//! Bands never borrow each other's workers: a flood of best-effort work
//! cannot starve the high-important band.  Counters aggregate over all
//! bands; CoDel (when enabled) runs independently in each band.

use std::time::Duration;

use log::info;

use super::pool::{PoolOptions, WorkerPool};
use super::queue::FifoQueue;
use super::{Priority, Task, TaskDispatcher, TaskStats};
use crate::error::EnqueueError;

pub struct BandedDispatcher {
    bands: Vec<WorkerPool<FifoQueue>>,
}

impl BandedDispatcher {
    /// Start `band_workers[p]` workers for each band `p`.  `max_queue_len`
    /// caps each band's queue (`0` = unbounded).
    pub fn start(
        prefix: &str,
        band_workers: [usize; Priority::COUNT],
        max_queue_len: usize,
        task_expire: Option<Duration>,
        codel: bool,
        enable_task_stats: bool,
    ) -> Self {
        let bands = Priority::ALL
            .iter()
            .map(|p| {
                WorkerPool::start(
                    FifoQueue::default(),
                    PoolOptions {
                        name: format!("{}-{}", prefix, p.name()),
                        workers: band_workers[p.index()],
                        max_pending: max_queue_len,
                        task_expire,
                        codel,
                        enable_task_stats,
                    },
                )
            })
            .collect();
        info!("dispatcher: banded pools started {:?}", band_workers);
        Self { bands }
    }

    pub fn band(&self, priority: Priority) -> &WorkerPool<FifoQueue> {
        &self.bands[priority.index()]
    }

    fn sum<T: core::iter::Sum<T>>(&self, f: impl Fn(&WorkerPool<FifoQueue>) -> T) -> T {
        self.bands.iter().map(f).sum()
    }
}

impl TaskDispatcher for BandedDispatcher {
    fn enqueue(&self, task: Task) -> Result<(), EnqueueError> {
        self.band(task.priority()).enqueue(task)
    }

    fn idle_worker_count(&self) -> usize {
        self.sum(|b| b.idle_worker_count())
    }

    fn worker_count(&self) -> usize {
        self.sum(|b| b.worker_count())
    }

    fn pending_task_count(&self) -> usize {
        self.sum(|b| b.pending_task_count())
    }

    fn total_task_count(&self) -> u64 {
        self.sum(|b| b.total_task_count())
    }

    fn expired_task_count(&self) -> u64 {
        self.sum(|b| b.expired_task_count())
    }

    fn task_stats(&self) -> TaskStats {
        let mut all = TaskStats::default();
        for b in &self.bands {
            all.merge(&b.task_stats());
        }
        all
    }

    fn clear_pending(&self) -> usize {
        self.sum(|b| b.clear_pending())
    }

    fn join(&self) {
        for b in &self.bands {
            b.join();
        }
    }

    fn stop(&self) {
        for b in &self.bands {
            b.stop();
        }
    }
}
