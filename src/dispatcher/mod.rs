//! Task dispatcher: bounded worker pools that run gateway jobs.
//!
//! ```text
//!             enqueue(Task)
//!                  │
//!      ┌───────────┼──────────────────────────┐
//!      ▼           ▼                          ▼
//!  ┌────────┐ ┌──────────────┐   ┌───────────────────────────┐
//!  │ Simple │ │ PriorityQueue│   │ Banded (one pool per band)│
//!  │  FIFO  │ │ heap (p, seq)│   │ HI │ H │ I │ N │ BE       │
//!  └───┬────┘ └──────┬───────┘   └─┬────┬───┬───┬───┬────────┘
//!      ▼             ▼             ▼    ▼   ▼   ▼   ▼
//!   workers       workers        workers per band (+ CoDel)
//! ```
//!
//! Every flavor implements [`TaskDispatcher`].  Enqueue never blocks:
//! a full or stopped dispatcher hands the task back in an
//! [`EnqueueError`] so the caller can dispose of its request.
//!
//! A task whose queue wait exceeds the configured expiry, or that CoDel
//! decides to shed, is *expired*: its [`Job::expire`] entry point runs
//! instead of [`Job::run`].

pub mod banded;
pub mod codel;
pub mod pool;
pub mod queue;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{DispatcherConfig, DispatcherKind};
use crate::error::{ConfigError, DispatchError, EnqueueError};

pub use banded::BandedDispatcher;
pub use pool::WorkerPool;
pub use queue::{FifoQueue, PriorityQueue};

// ── Priority ─────────────────────────────────────────────────

/// Scheduling band, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Priority {
    HighImportant = 0,
    High = 1,
    Important = 2,
    #[default]
    Normal = 3,
    BestEffort = 4,
}

impl Priority {
    pub const COUNT: usize = 5;

    pub const ALL: [Priority; Self::COUNT] = [
        Self::HighImportant,
        Self::High,
        Self::Important,
        Self::Normal,
        Self::BestEffort,
    ];

    /// Map an integer band to a priority.  `None` outside `0..=4`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::HighImportant),
            1 => Some(Self::High),
            2 => Some(Self::Important),
            3 => Some(Self::Normal),
            4 => Some(Self::BestEffort),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::HighImportant => "high_important",
            Self::High => "high",
            Self::Important => "important",
            Self::Normal => "normal",
            Self::BestEffort => "best_effort",
        }
    }
}

// ── Job / Task ───────────────────────────────────────────────

/// Unit of work carried by a [`Task`].
pub trait Job: Send {
    /// Execute on a worker thread.
    fn run(self: Box<Self>);

    /// Dispose of the work without running it (expired, shed or cleared).
    fn expire(self: Box<Self>);

    /// The dispatcher refused the task at enqueue time.
    fn reject(self: Box<Self>, reason: DispatchError) {
        let _ = reason;
        self.expire()
    }
}

struct FnJob<F>(F);

impl<F: FnOnce() + Send> Job for FnJob<F> {
    fn run(self: Box<Self>) {
        (self.0)()
    }

    fn expire(self: Box<Self>) {}
}

/// A prioritized job plus the instant it entered the queue.
pub struct Task {
    priority: Priority,
    enqueued_at: Instant,
    job: Box<dyn Job>,
}

impl Task {
    pub fn new(priority: Priority, job: impl Job + 'static) -> Self {
        Self {
            priority,
            enqueued_at: Instant::now(),
            job: Box::new(job),
        }
    }

    /// Task from a closure; expiring it simply drops the closure.
    pub fn from_fn<F>(priority: Priority, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(priority, FnJob(f))
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Time spent since the task was queued.
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    pub(crate) fn stamp(&mut self, now: Instant) {
        self.enqueued_at = now;
    }

    pub(crate) fn run(self) {
        self.job.run()
    }

    pub(crate) fn expire(self) {
        self.job.expire()
    }

    pub(crate) fn reject(self, reason: DispatchError) {
        self.job.reject(reason)
    }
}

// ── Statistics ───────────────────────────────────────────────

/// Aggregate timings, collected only when task stats are enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks whose timings were recorded.
    pub samples: u64,
    pub total_wait: Duration,
    pub max_wait: Duration,
    pub total_run: Duration,
    pub max_run: Duration,
}

impl TaskStats {
    pub(crate) fn record(&mut self, wait: Duration, run: Duration) {
        self.samples += 1;
        self.total_wait += wait;
        self.max_wait = self.max_wait.max(wait);
        self.total_run += run;
        self.max_run = self.max_run.max(run);
    }

    pub(crate) fn merge(&mut self, other: &TaskStats) {
        self.samples += other.samples;
        self.total_wait += other.total_wait;
        self.max_wait = self.max_wait.max(other.max_wait);
        self.total_run += other.total_run;
        self.max_run = self.max_run.max(other.max_run);
    }

    pub fn mean_wait(&self) -> Duration {
        mean(self.total_wait, self.samples)
    }

    pub fn mean_run(&self) -> Duration {
        mean(self.total_run, self.samples)
    }
}

fn mean(total: Duration, n: u64) -> Duration {
    if n == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos((total.as_nanos() / u128::from(n)) as u64)
}

// ── Dispatcher trait ─────────────────────────────────────────

pub trait TaskDispatcher: Send + Sync {
    /// Queue a task without blocking.
    fn enqueue(&self, task: Task) -> Result<(), EnqueueError>;

    fn idle_worker_count(&self) -> usize;

    fn worker_count(&self) -> usize;

    fn pending_task_count(&self) -> usize;

    /// Tasks that ran to completion (including ones that panicked).
    fn total_task_count(&self) -> u64;

    fn expired_task_count(&self) -> u64;

    fn task_stats(&self) -> TaskStats;

    /// Expire every queued task.  Returns how many were removed.
    fn clear_pending(&self) -> usize;

    /// Stop accepting, run everything already queued, wait for workers.
    fn join(&self);

    /// Stop accepting, expire everything queued, wait for in-flight work.
    fn stop(&self);
}

/// Build and start the dispatcher described by `config`.
pub fn build(config: &DispatcherConfig) -> Result<Arc<dyn TaskDispatcher>, ConfigError> {
    config.validate()?;

    let expire = config.task_expire();
    let prefix = config.thread_name_prefix.as_str();
    let stats = config.enable_task_stats;

    let dispatcher: Arc<dyn TaskDispatcher> = match &config.kind {
        DispatcherKind::Simple {
            workers,
            max_pending,
        } => Arc::new(WorkerPool::start(
            FifoQueue::default(),
            pool::PoolOptions {
                name: prefix.to_owned(),
                workers: *workers,
                max_pending: *max_pending,
                task_expire: expire,
                codel: false,
                enable_task_stats: stats,
            },
        )),
        DispatcherKind::PriorityQueue {
            workers,
            max_pending,
        } => Arc::new(WorkerPool::start(
            PriorityQueue::default(),
            pool::PoolOptions {
                name: prefix.to_owned(),
                workers: *workers,
                max_pending: *max_pending,
                task_expire: expire,
                codel: false,
                enable_task_stats: stats,
            },
        )),
        DispatcherKind::Banded {
            band_workers,
            max_queue_len,
        } => Arc::new(BandedDispatcher::start(
            prefix,
            *band_workers,
            *max_queue_len,
            expire,
            config.enable_codel,
            stats,
        )),
    };
    Ok(dispatcher)
}
