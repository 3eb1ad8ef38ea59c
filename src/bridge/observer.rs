//! Optional server observer, with failures swallowed.

use std::sync::Arc;

use log::error;

use crate::app::ports::ServerObserver;
use crate::error::HandlerError;
use crate::runtime::{self, RuntimeGuard};

#[derive(Clone, Default)]
pub struct ObserverHook {
    inner: Option<Arc<dyn ServerObserver>>,
}

impl ObserverHook {
    pub fn new(inner: Option<Arc<dyn ServerObserver>>) -> Self {
        Self { inner }
    }

    pub fn is_set(&self) -> bool {
        self.inner.is_some()
    }

    /// Invoke `f` on the observer with the lock already held.
    pub fn notify<F>(&self, guard: &RuntimeGuard<'_>, what: &'static str, f: F)
    where
        F: FnOnce(&dyn ServerObserver, &RuntimeGuard<'_>) -> Result<(), HandlerError>,
    {
        if let Some(o) = &self.inner {
            if let Err(e) = f(o.as_ref(), guard) {
                error!("observer: {} failed: {}", what, e);
            }
        }
    }

    /// Acquire the runtime lock (only if an observer is set) and notify.
    pub fn notify_locked<F>(&self, what: &'static str, f: F)
    where
        F: FnOnce(&dyn ServerObserver, &RuntimeGuard<'_>) -> Result<(), HandlerError>,
    {
        if self.inner.is_none() {
            return;
        }
        let guard = runtime::acquire();
        self.notify(&guard, what, f);
    }
}
