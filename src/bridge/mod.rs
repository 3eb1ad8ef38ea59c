//! Cross-runtime gateway: from framed request to handler call.
//!
//! ```text
//!  I/O thread                        worker thread
//!  ──────────                        ─────────────
//!  Processor::process(req)
//!    ├─ method_name(buf)             GatewayJob::run
//!    ├─ resolve priority               ├─ inactive & two-way? ─▶ drop
//!    ├─ oneway? (+ ack if two-way)     ├─ acquire runtime lock
//!    └─ enqueue(Task) ───────────────▶ ├─ ContextData + CallbackHandle
//!          │ rejected                  ├─ adapter.dispatch(call)
//!          ▼                           └─ release lock
//!       Loadshedding error                    │
//!                                             ▼  (later, any thread)
//!                                      CallbackHandle::call(value)
//! ```
//!
//! Every request ends in exactly one of `Completed`, `Errored` or
//! `Dropped`, whichever path it takes.

pub mod callback;
pub mod observer;
pub mod oneway;
pub mod priority;

use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, warn};

use crate::app::ports::{CallTimestamps, HandlerAdapter, HandlerCall, ServerObserver};
use crate::config::BridgeConfig;
use crate::dispatcher::{Job, Task, TaskDispatcher};
use crate::error::{AppError, AppErrorKind, CallbackError, DispatchError, EnqueueError};
use crate::rpc::envelope;
use crate::rpc::reply::{self, ReplyChannel};
use crate::rpc::request::Request;
use crate::runtime;

use callback::CallbackHandle;
use observer::ObserverHook;
use oneway::OnewayRegistry;

/// Gateway construction options.
#[derive(Clone)]
pub struct ProcessorOptions {
    /// Ack oneway methods that arrived framed as two-way.
    pub ack_oneway: bool,
    pub observer: Option<Arc<dyn ServerObserver>>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            ack_oneway: true,
            observer: None,
        }
    }
}

impl From<&BridgeConfig> for ProcessorOptions {
    fn from(cfg: &BridgeConfig) -> Self {
        Self {
            ack_oneway: cfg.ack_oneway,
            observer: None,
        }
    }
}

pub struct Processor {
    adapter: Arc<dyn HandlerAdapter>,
    dispatcher: Arc<dyn TaskDispatcher>,
    oneway: OnewayRegistry,
    observer: ObserverHook,
    ack_oneway: bool,
}

impl Processor {
    /// Load the oneway registry (under the runtime lock) and wire the
    /// gateway to `dispatcher`.
    pub fn new(
        adapter: Arc<dyn HandlerAdapter>,
        dispatcher: Arc<dyn TaskDispatcher>,
        options: ProcessorOptions,
    ) -> Self {
        let oneway = {
            let guard = runtime::acquire();
            OnewayRegistry::load(adapter.as_ref(), &guard)
        };
        Self {
            adapter,
            dispatcher,
            oneway,
            observer: ObserverHook::new(options.observer),
            ack_oneway: options.ack_oneway,
        }
    }

    pub fn oneway_registry(&self) -> &OnewayRegistry {
        &self.oneway
    }

    pub fn dispatcher(&self) -> &Arc<dyn TaskDispatcher> {
        &self.dispatcher
    }

    /// Identify, prioritize and queue one request.  On rejection the
    /// request has already been answered (or dropped if oneway).
    pub fn process(&self, request: Request) -> Result<(), DispatchError> {
        let method = envelope::method_name(request.buf(), request.header().protocol_id());
        let priority =
            priority::resolve(self.adapter.as_ref(), &method, request.header().call_priority());
        let oneway = self.oneway.contains(&method);

        if oneway && !request.is_transport_oneway() && self.ack_oneway {
            debug!("bridge: acking oneway {:?} framed as two-way", method);
            reply::send_oneway_ack(&request);
        }

        self.observer
            .notify_locked("received_request", |o, g| o.received_request(g));

        let job = GatewayJob {
            adapter: self.adapter.clone(),
            observer: self.observer.clone(),
            channel: ReplyChannel::new(request, method, oneway),
        };

        match self.dispatcher.enqueue(Task::new(priority, job)) {
            Ok(()) => {
                if self.observer.is_set() {
                    let n = self.dispatcher.pending_task_count();
                    self.observer
                        .notify_locked("queued_requests", |o, g| o.queued_requests(g, n));
                }
                Ok(())
            }
            Err(EnqueueError { kind, task }) => {
                warn!("bridge: request rejected by dispatcher: {}", kind);
                self.observer
                    .notify_locked("server_overloaded", |o, g| o.server_overloaded(g));
                task.reject(kind);
                Err(kind)
            }
        }
    }

    /// Stop the dispatcher with the runtime lock released, so workers
    /// blocked on the lock can finish.  `drain` runs queued work first.
    pub fn shutdown(&self, drain: bool) {
        let mut guard = runtime::acquire();
        guard.allow_threads(|| {
            if drain {
                self.dispatcher.join();
            } else {
                self.dispatcher.stop();
            }
        });
    }
}

// ── Gateway job ──────────────────────────────────────────────

struct GatewayJob {
    adapter: Arc<dyn HandlerAdapter>,
    observer: ObserverHook,
    channel: ReplyChannel,
}

impl Job for GatewayJob {
    fn run(self: Box<Self>) {
        let Self {
            adapter,
            observer,
            channel,
        } = *self;
        let request = channel.request();

        if !channel.is_oneway() && !request.is_active() {
            debug!("bridge: {} inactive before dispatch", channel.method());
            channel.drop_request();
            return;
        }
        if !request.status().mark_dispatched() {
            error!(
                "bridge: {} not dispatchable from {:?}, handler skipped",
                channel.method(),
                request.status().get()
            );
            return;
        }

        let mut timestamps = CallTimestamps::new(request.received_at());
        timestamps.process_begin = Some(Instant::now());

        let guard = runtime::acquire();

        let context = Arc::new(request.connection().context());
        let input = request.buf().clone();
        let headers = request.header().headers().clone();
        let client_type = request.header().client_type();
        let protocol_id = request.header().protocol_id();
        let method = channel.method().to_owned();

        let callback = CallbackHandle::new(channel, context.clone(), observer, timestamps);
        let call = HandlerCall {
            input,
            headers,
            client_type,
            protocol_id,
            context,
            callback: callback.clone(),
        };

        if let Err(e) = adapter.dispatch(&guard, call) {
            error!("bridge: handler failed to start {:?}: {}", method, e);
            match callback.fail(e) {
                Ok(()) => {}
                // Completed inline before failing: that outcome stands.
                Err(CallbackError::AlreadyCompleted) => {
                    debug!("bridge: {:?} already replied, start error ignored", method);
                }
            }
        }
        drop(guard);
    }

    fn expire(self: Box<Self>) {
        debug!("bridge: {} expired in queue", self.channel.method());
        self.observer
            .notify_locked("task_expired", |o, g| o.task_expired(g));
        self.channel.drop_request();
    }

    fn reject(self: Box<Self>, reason: DispatchError) {
        if self.channel.is_oneway() {
            self.channel.drop_request();
            return;
        }
        let err = AppError::new(
            AppErrorKind::Loadshedding,
            format!("{}: {}", self.channel.method(), reason),
        );
        self.channel.send_error(err);
    }
}
