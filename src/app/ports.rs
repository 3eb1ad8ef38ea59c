//! Port traits: the boundary between the bridge and the foreign runtime.
//!
//! ```text
//!   Processor ──▶ HandlerAdapter ──▶ foreign handler
//!       │
//!       ├──▶ ServerObserver           (optional, metrics-style hooks)
//!   Connection ──▶ ConnectionEventHandler (optional, lifecycle hooks)
//! ```
//!
//! Every method takes a [`RuntimeGuard`]: the foreign runtime may only be
//! touched while the exclusive runtime lock is held, and holding the
//! guard is the proof.
//!
//! ## Failure notes
//!
//! - Adapter failures are typed [`HandlerError`]s; the bridge decides the
//!   consequence (default priority, error reply, fail-open registry).
//! - Observer and connection-event failures are logged and swallowed.
//!   They never affect a request.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::bridge::callback::CallbackHandle;
use crate::error::HandlerError;
use crate::rpc::connection::ContextData;
use crate::rpc::header::ClientType;
use crate::runtime::RuntimeGuard;

// ───────────────────────────────────────────────────────────────
// Handler adapter (driven: bridge → foreign handler)
// ───────────────────────────────────────────────────────────────

/// Everything the handler receives for one request.
pub struct HandlerCall {
    /// Framed request bytes, unmodified.
    pub input: Arc<[u8]>,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    pub client_type: ClientType,
    /// Wire protocol id as received.
    pub protocol_id: i16,
    /// Context snapshot; the handler may set the exception slots on it.
    pub context: Arc<ContextData>,
    /// Completes the request.  Call exactly once, from any thread.
    pub callback: CallbackHandle,
}

/// The foreign handler, as seen by the bridge.
pub trait HandlerAdapter: Send + Sync {
    /// Names of methods that never reply.  Queried once at startup.
    fn oneway_methods(&self, guard: &RuntimeGuard<'_>) -> Result<Vec<String>, HandlerError>;

    /// Integer priority band for `method` (`0` = highest, `4` = lowest).
    fn priority_of(&self, guard: &RuntimeGuard<'_>, method: &str) -> Result<i32, HandlerError>;

    /// Start processing a request.  The handler completes it later (or
    /// inline) through `call.callback`.
    fn dispatch(&self, guard: &RuntimeGuard<'_>, call: HandlerCall) -> Result<(), HandlerError>;
}

// ───────────────────────────────────────────────────────────────
// Server observer (driven: bridge → foreign metrics)
// ───────────────────────────────────────────────────────────────

/// Timing of one call, handed to [`ServerObserver::call_completed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimestamps {
    pub received: Instant,
    pub process_begin: Option<Instant>,
    pub process_end: Option<Instant>,
}

impl CallTimestamps {
    pub fn new(received: Instant) -> Self {
        Self {
            received,
            process_begin: None,
            process_end: None,
        }
    }
}

/// Optional hooks; every method defaults to a no-op, so an observer only
/// implements what it cares about.
pub trait ServerObserver: Send + Sync {
    fn received_request(&self, _guard: &RuntimeGuard<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Pending tasks right after a successful enqueue.
    fn queued_requests(&self, _guard: &RuntimeGuard<'_>, _n: usize) -> Result<(), HandlerError> {
        Ok(())
    }

    /// The dispatcher refused a request.
    fn server_overloaded(&self, _guard: &RuntimeGuard<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// A queued request expired (or was shed) before it ran.
    fn task_expired(&self, _guard: &RuntimeGuard<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    fn sent_reply(&self, _guard: &RuntimeGuard<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    fn call_completed(
        &self,
        _guard: &RuntimeGuard<'_>,
        _timestamps: &CallTimestamps,
    ) -> Result<(), HandlerError> {
        Ok(())
    }
}

// ───────────────────────────────────────────────────────────────
// Connection events (driven: transport → foreign handler)
// ───────────────────────────────────────────────────────────────

pub trait ConnectionEventHandler: Send + Sync {
    fn new_connection(
        &self,
        guard: &RuntimeGuard<'_>,
        context: &ContextData,
    ) -> Result<(), HandlerError>;

    fn connection_destroyed(
        &self,
        guard: &RuntimeGuard<'_>,
        context: &ContextData,
    ) -> Result<(), HandlerError>;
}
