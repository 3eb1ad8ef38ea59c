//! Completion callback handed to the foreign handler.
//!
//! ```text
//!  handler thread (any)                      event loop
//!  ────────────────────                      ──────────
//!  callback.call(value)
//!    ├─ acquire runtime lock
//!    ├─ classify value ── fail ──▶ send_error ───────▶ exception frame
//!    ├─ empty bytes ─────────────▶ drop_request ─────▶ release
//!    ├─ copy uex / uexw onto header
//!    ├─ apply write transforms
//!    ├─ release lock
//!    └─ send_reply ──────────────────────────────────▶ transport.write
//! ```
//!
//! The handle is cheap to clone, but the request behind it completes
//! once: the first `call` takes it, later calls are rejected with
//! [`CallbackError::AlreadyCompleted`].  If every handle is dropped
//! without a call, the request is dropped.

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};
use parking_lot::Mutex;

use super::observer::ObserverHook;
use crate::app::ports::CallTimestamps;
use crate::error::{AppError, CallbackError, HandlerError};
use crate::rpc::connection::ContextData;
use crate::rpc::header::{HEADER_EX, HEADER_EX_WHAT};
use crate::rpc::reply::ReplyChannel;
use crate::rpc::transform;
use crate::runtime;

/// A value returned by the foreign handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignValue {
    /// The handler produced nothing.
    None,
    /// Serialized reply payload.  Empty means "nothing to send".
    Bytes(Vec<u8>),
    Text(String),
    Int(i64),
    /// The handler raised while producing its result.
    Raised(HandlerError),
}

impl ForeignValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "str",
            Self::Int(_) => "int",
            Self::Raised(_) => "exception",
        }
    }

    /// `Ok(None)` for empty bytes, `Ok(Some)` for a payload.
    fn into_payload(self) -> Result<Option<Vec<u8>>, HandlerError> {
        match self {
            Self::Bytes(b) if b.is_empty() => Ok(None),
            Self::Bytes(b) => Ok(Some(b)),
            Self::None => Err(HandlerError::MissingResult),
            Self::Raised(e) => Err(e),
            other => Err(HandlerError::BadReturn(other.type_name())),
        }
    }
}

struct Pending {
    channel: ReplyChannel,
    context: Arc<ContextData>,
    timestamps: CallTimestamps,
}

struct Cell {
    pending: Mutex<Option<Pending>>,
    observer: ObserverHook,
}

impl Drop for Cell {
    fn drop(&mut self) {
        if let Some(p) = self.pending.get_mut().take() {
            warn!(
                "callback: {} released without completion, dropping request",
                p.channel.method()
            );
            p.channel.drop_request();
        }
    }
}

#[derive(Clone)]
pub struct CallbackHandle {
    cell: Arc<Cell>,
}

impl CallbackHandle {
    pub(crate) fn new(
        channel: ReplyChannel,
        context: Arc<ContextData>,
        observer: ObserverHook,
        timestamps: CallTimestamps,
    ) -> Self {
        Self {
            cell: Arc::new(Cell {
                pending: Mutex::new(Some(Pending {
                    channel,
                    context,
                    timestamps,
                })),
                observer,
            }),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.cell.pending.lock().is_none()
    }

    /// Complete the request with the handler's result.
    pub fn call(&self, value: ForeignValue) -> Result<(), CallbackError> {
        let Some(pending) = self.cell.pending.lock().take() else {
            error!("callback: invoked more than once, ignoring");
            return Err(CallbackError::AlreadyCompleted);
        };
        complete(pending, value, &self.cell.observer);
        Ok(())
    }

    /// Fail the request as if the handler had raised `err`.  Unlike
    /// [`call`](Self::call), finding it already completed is expected
    /// and not logged.
    pub(crate) fn fail(&self, err: HandlerError) -> Result<(), CallbackError> {
        let pending = self
            .cell
            .pending
            .lock()
            .take()
            .ok_or(CallbackError::AlreadyCompleted)?;
        complete(pending, ForeignValue::Raised(err), &self.cell.observer);
        Ok(())
    }
}

fn complete(pending: Pending, value: ForeignValue, observer: &ObserverHook) {
    let Pending {
        mut channel,
        context,
        mut timestamps,
    } = pending;

    let guard = runtime::acquire();

    let payload = match value.into_payload() {
        Ok(Some(p)) => p,
        Ok(None) => {
            drop(guard);
            debug!("callback: {} returned no payload", channel.method());
            channel.drop_request();
            return;
        }
        Err(e) => {
            drop(guard);
            fail(channel, e);
            return;
        }
    };

    if !channel.request().is_active() {
        drop(guard);
        debug!("callback: {} finished on inactive connection", channel.method());
        channel.drop_request();
        return;
    }

    let header = channel.request_mut().header_mut();
    let ex = context.header_ex();
    if !ex.is_empty() {
        header.set(HEADER_EX, ex);
    }
    let ex_what = context.header_ex_what();
    if !ex_what.is_empty() {
        header.set(HEADER_EX_WHAT, ex_what);
    }

    let frame = match transform::apply(
        payload,
        header.write_transforms(),
        header.min_compress_bytes(),
    ) {
        Ok(f) => f,
        Err(e) => {
            drop(guard);
            fail(channel, e.into());
            return;
        }
    };

    timestamps.process_end = Some(Instant::now());
    observer.notify(&guard, "sent_reply", |o, g| o.sent_reply(g));
    observer.notify(&guard, "call_completed", |o, g| o.call_completed(g, &timestamps));
    drop(guard);

    channel.send_reply(frame);
}

fn fail(channel: ReplyChannel, err: HandlerError) {
    if channel.is_oneway() {
        error!("callback: oneway {} failed: {}", channel.method(), err);
    }
    let msg = format!("Failed to read response from handler: {err}");
    channel.send_error(AppError::unknown(msg));
}
