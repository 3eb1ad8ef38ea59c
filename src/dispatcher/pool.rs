//! Generic worker pool over a [`TaskQueue`].
//!
//! ```text
//!  enqueue ──▶ Mutex<State{ queue, idle, codel }> ──notify──▶ worker-0..N
//!                                                     │
//!                              expired / shed? ──yes──┼──▶ Job::expire
//!                                                     └──▶ Job::run (catch_unwind)
//! ```
//!
//! Workers block on a condvar while the queue is empty.  The expiry and
//! CoDel decisions are taken under the pool lock right after popping;
//! the job itself always runs with the lock released.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};

use super::codel::Codel;
use super::queue::TaskQueue;
use super::{Task, TaskDispatcher, TaskStats};
use crate::error::{DispatchError, EnqueueError};

/// Construction options for one pool.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Pool name; worker threads are `<name>-<n>`.
    pub name: String,
    pub workers: usize,
    /// Pending-task cap; `0` means unbounded.
    pub max_pending: usize,
    pub task_expire: Option<Duration>,
    pub codel: bool,
    pub enable_task_stats: bool,
}

struct State<Q> {
    queue: Q,
    accepting: bool,
    exiting: bool,
    idle: usize,
    codel: Option<Codel>,
    stats: TaskStats,
}

struct Shared<Q> {
    name: String,
    max_pending: usize,
    task_expire: Option<Duration>,
    enable_task_stats: bool,
    state: Mutex<State<Q>>,
    available: Condvar,
    live_workers: AtomicUsize,
    completed: AtomicU64,
    expired: AtomicU64,
}

enum Next {
    Run(Task),
    Expire(Task, &'static str),
    Exit,
}

pub struct WorkerPool<Q: TaskQueue> {
    shared: Arc<Shared<Q>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl<Q: TaskQueue> WorkerPool<Q> {
    /// Spawn the workers and start accepting tasks.
    pub fn start(queue: Q, opts: PoolOptions) -> Self {
        let shared = Arc::new(Shared {
            name: opts.name.clone(),
            max_pending: opts.max_pending,
            task_expire: opts.task_expire,
            enable_task_stats: opts.enable_task_stats,
            state: Mutex::new(State {
                queue,
                accepting: true,
                exiting: false,
                idle: 0,
                codel: opts.codel.then(|| Codel::new(Instant::now())),
                stats: TaskStats::default(),
            }),
            available: Condvar::new(),
            live_workers: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        });

        let mut handles = Vec::with_capacity(opts.workers);
        for n in 0..opts.workers {
            let s = shared.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("{}-{}", opts.name, n))
                .spawn(move || worker_loop(s));
            match spawned {
                Ok(h) => {
                    shared.live_workers.fetch_add(1, Ordering::SeqCst);
                    handles.push(h);
                }
                Err(e) => error!("pool[{}]: failed to spawn worker {}: {}", opts.name, n, e),
            }
        }

        info!(
            "pool[{}]: started {} workers (max_pending={}, expire={:?}, codel={})",
            opts.name,
            handles.len(),
            opts.max_pending,
            opts.task_expire,
            opts.codel
        );

        Self {
            shared,
            handles: Mutex::new(handles),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Whether CoDel currently considers this pool overloaded.
    pub fn is_overloaded(&self) -> bool {
        self.shared
            .state
            .lock()
            .codel
            .as_ref()
            .is_some_and(Codel::is_overloaded)
    }

    fn expire_all(&self, tasks: Vec<Task>) -> usize {
        let n = tasks.len();
        self.shared.expired.fetch_add(n as u64, Ordering::Relaxed);
        for t in tasks {
            t.expire();
        }
        n
    }

    fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        let me = std::thread::current().id();
        for h in handles {
            if h.thread().id() == me {
                warn!("pool[{}]: shutdown requested from a worker", self.shared.name);
                continue;
            }
            if h.join().is_err() {
                error!("pool[{}]: worker exited by panic", self.shared.name);
            }
        }
    }
}

impl<Q: TaskQueue> TaskDispatcher for WorkerPool<Q> {
    fn enqueue(&self, mut task: Task) -> Result<(), EnqueueError> {
        let mut st = self.shared.state.lock();
        if !st.accepting {
            return Err(EnqueueError {
                kind: DispatchError::ShutDown,
                task,
            });
        }
        if self.shared.max_pending > 0 && st.queue.len() >= self.shared.max_pending {
            return Err(EnqueueError {
                kind: DispatchError::QueueFull,
                task,
            });
        }
        task.stamp(Instant::now());
        st.queue.push(task);
        drop(st);
        self.shared.available.notify_one();
        Ok(())
    }

    fn idle_worker_count(&self) -> usize {
        self.shared.state.lock().idle
    }

    fn worker_count(&self) -> usize {
        self.shared.live_workers.load(Ordering::SeqCst)
    }

    fn pending_task_count(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    fn total_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    fn expired_task_count(&self) -> u64 {
        self.shared.expired.load(Ordering::Relaxed)
    }

    fn task_stats(&self) -> TaskStats {
        self.shared.state.lock().stats
    }

    fn clear_pending(&self) -> usize {
        let drained = self.shared.state.lock().queue.drain();
        let n = self.expire_all(drained);
        if n > 0 {
            info!("pool[{}]: cleared {} pending tasks", self.shared.name, n);
        }
        n
    }

    fn join(&self) {
        {
            let mut st = self.shared.state.lock();
            st.accepting = false;
            st.exiting = true;
        }
        self.shared.available.notify_all();
        self.join_workers();
    }

    fn stop(&self) {
        let drained = {
            let mut st = self.shared.state.lock();
            st.accepting = false;
            st.exiting = true;
            st.queue.drain()
        };
        self.shared.available.notify_all();
        let n = self.expire_all(drained);
        if n > 0 {
            info!("pool[{}]: stop expired {} queued tasks", self.shared.name, n);
        }
        self.join_workers();
    }
}

impl<Q: TaskQueue> Drop for WorkerPool<Q> {
    fn drop(&mut self) {
        if !self.handles.lock().is_empty() {
            self.join();
        }
    }
}

// ── Worker ───────────────────────────────────────────────────

fn worker_loop<Q: TaskQueue>(shared: Arc<Shared<Q>>) {
    loop {
        match next_task(&shared) {
            Next::Exit => break,
            Next::Expire(task, why) => {
                shared.expired.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "pool[{}]: {} task ({:?}) after {:?}",
                    shared.name,
                    why,
                    task.priority(),
                    task.waited(Instant::now())
                );
                task.expire();
            }
            Next::Run(task) => run_task(&shared, task),
        }
    }
    shared.live_workers.fetch_sub(1, Ordering::SeqCst);
}

fn next_task<Q: TaskQueue>(shared: &Shared<Q>) -> Next {
    let mut st = shared.state.lock();
    let task = loop {
        if let Some(t) = st.queue.pop() {
            break t;
        }
        if st.exiting {
            return Next::Exit;
        }
        st.idle += 1;
        shared.available.wait(&mut st);
        st.idle -= 1;
    };

    let now = Instant::now();
    let waited = task.waited(now);
    if shared.task_expire.is_some_and(|limit| waited > limit) {
        return Next::Expire(task, "expired");
    }
    if let Some(codel) = st.codel.as_mut() {
        if codel.should_shed(waited, now) {
            return Next::Expire(task, "shed");
        }
    }
    Next::Run(task)
}

fn run_task<Q: TaskQueue>(shared: &Shared<Q>, task: Task) {
    let started = Instant::now();
    let waited = task.waited(started);

    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        error!("pool[{}]: task panicked", shared.name);
    }
    shared.completed.fetch_add(1, Ordering::Relaxed);

    if shared.enable_task_stats {
        let ran = started.elapsed();
        shared.state.lock().stats.record(waited, ran);
    }
}
