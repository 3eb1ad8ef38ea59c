//! Connection event loop: the single thread that owns reply delivery.
//!
//! Runs in a dedicated thread using `edge-executor`, driven by
//! `futures_lite::future::block_on`.  One task drains an `embassy-sync`
//! channel of boxed closures; anything that must happen on the loop
//! thread (writing a reply, releasing a request) is posted here.
//!
//! ```text
//!  worker-0 ─┐                    ┌──────────────────────────────────┐
//!  worker-1 ─┼─ run_in_loop(f) ──▶│  Channel<LoopMsg, 64>            │
//!  callback ─┘        │           │        │ receive().await         │
//!                     │ full      │        ▼                         │
//!                     └─────────▶ │  overflow ─▶ LocalExecutor ─▶ f()│
//!                                 └──────────────────────────────────┘
//! ```
//!
//! Posting never blocks: when the channel is full, work spills into an
//! overflow queue that the loop drains once the channel is empty, so
//! closures still run in posting order.  A caller may therefore post
//! while holding the runtime lock.  A call from the loop thread itself
//! runs inline.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{debug, error, info, warn};
use parking_lot::Mutex;

/// Closures waiting to run on the loop.
const LOOP_QUEUE_DEPTH: usize = 64;

type LoopFn = Box<dyn FnOnce() + Send>;

enum LoopMsg {
    Run(LoopFn),
    Stop,
}

struct LoopShared {
    name: String,
    channel: Channel<CriticalSectionRawMutex, LoopMsg, LOOP_QUEUE_DEPTH>,
    overflow: Mutex<VecDeque<LoopMsg>>,
    thread_id: OnceLock<ThreadId>,
    running: AtomicBool,
}

/// Cloneable handle for posting work onto a loop.
#[derive(Clone)]
pub struct EventLoopHandle {
    inner: Arc<LoopShared>,
}

impl EventLoopHandle {
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the calling thread is this loop's thread.
    pub fn is_in_loop_thread(&self) -> bool {
        self.inner.thread_id.get() == Some(&std::thread::current().id())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Run `f` on the loop thread: inline if already there, otherwise
    /// queued behind earlier work.
    pub fn run_in_loop<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_in_loop_thread() {
            run_guarded(&self.inner.name, Box::new(f));
            return;
        }
        if self.inner.post(LoopMsg::Run(Box::new(f))).is_err() {
            warn!("loop[{}]: not running, dropping posted work", self.inner.name);
        }
    }
}

impl LoopShared {
    /// Queue `msg`, or hand it back once the loop has stopped.  The
    /// running check and the enqueue happen under the overflow lock, the
    /// same lock the loop holds when it flips `running` off, so anything
    /// accepted here is seen by the final drain.
    fn post(&self, msg: LoopMsg) -> Result<(), LoopMsg> {
        let mut overflow = self.overflow.lock();
        if !self.running.load(Ordering::Acquire) {
            return Err(msg);
        }
        if overflow.is_empty() {
            match self.channel.try_send(msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(msg)) => overflow.push_back(msg),
            }
        } else {
            overflow.push_back(msg);
        }
        debug!("loop[{}]: queue full, {} spilled", self.name, overflow.len());
        Ok(())
    }
}

/// Owner of the loop thread.  Dropping it shuts the loop down.
pub struct EventLoop {
    handle: EventLoopHandle,
    thread: Option<JoinHandle<()>>,
}

impl EventLoop {
    /// Spawn the loop thread.
    pub fn spawn(name: &str) -> std::io::Result<Self> {
        let shared = Arc::new(LoopShared {
            name: name.to_owned(),
            channel: Channel::new(),
            overflow: Mutex::new(VecDeque::new()),
            thread_id: OnceLock::new(),
            running: AtomicBool::new(true),
        });

        let s = shared.clone();
        let thread = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || run_loop(s))?;

        Ok(Self {
            handle: EventLoopHandle { inner: shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> EventLoopHandle {
        self.handle.clone()
    }

    /// Run everything already posted, then stop and join the thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if self.handle.is_in_loop_thread() {
            error!("loop[{}]: shutdown called from the loop itself", self.handle.name());
            return;
        }
        if self.handle.inner.post(LoopMsg::Stop).is_err() {
            debug!("loop[{}]: already stopped", self.handle.name());
        }
        if thread.join().is_err() {
            error!("loop[{}]: thread panicked", self.handle.name());
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

// ── Loop thread ──────────────────────────────────────────────

fn run_guarded(name: &str, f: LoopFn) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        error!("loop[{}]: posted work panicked", name);
    }
}

fn handle(shared: &LoopShared, msg: LoopMsg, stopping: &mut bool) {
    match msg {
        LoopMsg::Run(f) => run_guarded(&shared.name, f),
        LoopMsg::Stop => *stopping = true,
    }
}

/// Run everything currently queued: channel first, then the overflow,
/// until both are empty.
fn drain_ready(shared: &LoopShared, stopping: &mut bool) {
    loop {
        while let Ok(msg) = shared.channel.try_receive() {
            handle(shared, msg, stopping);
        }
        let spilled = std::mem::take(&mut *shared.overflow.lock());
        if spilled.is_empty() {
            return;
        }
        for msg in spilled {
            handle(shared, msg, stopping);
        }
    }
}

async fn drain(shared: Arc<LoopShared>) {
    let mut stopping = false;
    while !stopping {
        let msg = shared.channel.receive().await;
        handle(&shared, msg, &mut stopping);
        drain_ready(&shared, &mut stopping);
    }
}

fn run_loop(shared: Arc<LoopShared>) {
    let _ = shared.thread_id.set(std::thread::current().id());
    info!("loop[{}]: started", shared.name);

    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();
    let task = executor.spawn(drain(shared.clone()));
    futures_lite::future::block_on(executor.run(task));

    {
        let _posting = shared.overflow.lock();
        shared.running.store(false, Ordering::Release);
    }
    // Work accepted between the stop marker and the flag flip still runs.
    let mut stopping = true;
    drain_ready(&shared, &mut stopping);
    info!("loop[{}]: stopped", shared.name);
}
