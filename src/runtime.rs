//! Exclusive runtime lock.
//!
//! The foreign handler runtime tolerates only one thread touching its
//! objects at a time.  Every such touch (marshalling a request, calling the
//! handler, reading its result) happens while holding [`RUNTIME_LOCK`].
//!
//! ```text
//!  worker A ──acquire──▶ ┌──────────────┐ ──release──▶
//!  worker B ──(blocks)─▶ │ RUNTIME_LOCK │
//!  callback ──(blocks)─▶ └──────────────┘
//! ```
//!
//! The lock is reentrant: a handler that completes its callback inline,
//! while the bridge still holds the lock on the same thread, does not
//! deadlock.  Acquisition returns a [`RuntimeGuard`]; every
//! [`HandlerAdapter`](crate::app::ports::HandlerAdapter) method takes
//! `&RuntimeGuard`, so a foreign call without the lock does not compile.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

/// Process-wide runtime lock.
pub static RUNTIME_LOCK: RuntimeLock = RuntimeLock::new();

/// Acquire the process-wide runtime lock.
pub fn acquire() -> RuntimeGuard<'static> {
    RUNTIME_LOCK.acquire()
}

pub struct RuntimeLock {
    inner: ReentrantMutex<()>,
}

impl RuntimeLock {
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::const_reentrant_mutex(()),
        }
    }

    /// Block until the lock is held by the calling thread.
    pub fn acquire(&self) -> RuntimeGuard<'_> {
        RuntimeGuard {
            inner: self.inner.lock(),
        }
    }

    /// Whether the calling thread currently holds the lock.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }
}

impl Default for RuntimeLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof that the runtime lock is held.  Released on drop, including
/// during unwinding.
pub struct RuntimeGuard<'a> {
    inner: ReentrantMutexGuard<'a, ()>,
}

impl RuntimeGuard<'_> {
    /// Run `f` with this level of the lock released, reacquiring before
    /// returning.  Used around blocking waits that other lock holders may
    /// need to make progress on (dispatcher shutdown, joins).
    pub fn allow_threads<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        ReentrantMutexGuard::unlocked(&mut self.inner, f)
    }
}
