//! Connection handle and per-request execution context.
//!
//! A [`Connection`] is shared (`Arc`) between the transport that owns the
//! socket, every in-flight request on it, and the reply path.  Only the
//! active flag changes after construction.
//!
//! [`ContextData`] is the snapshot handed to the foreign handler: peer /
//! local address and client identity copied at dispatch time, plus two
//! slots the handler may fill to attach an exception to its reply.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use log::{debug, error, info, warn};
use parking_lot::Mutex;

use super::event_loop::EventLoopHandle;
use super::header::Header;
use super::transport::ReplyTransport;
use crate::app::ports::ConnectionEventHandler;
use crate::runtime;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Static facts about a peer, known at accept time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    /// Authenticated client identity (empty if unauthenticated).
    pub identity: String,
}

pub struct Connection {
    id: u64,
    info: PeerInfo,
    active: AtomicBool,
    destroyed: AtomicBool,
    event_loop: EventLoopHandle,
    transport: Arc<dyn ReplyTransport>,
    events: Option<Arc<dyn ConnectionEventHandler>>,
}

impl Connection {
    /// Register a newly accepted connection.  The optional event handler
    /// sees `new_connection` under the runtime lock.
    pub fn open(
        info: PeerInfo,
        event_loop: EventLoopHandle,
        transport: Arc<dyn ReplyTransport>,
        events: Option<Arc<dyn ConnectionEventHandler>>,
    ) -> Arc<Self> {
        let conn = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            info,
            active: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
            event_loop,
            transport,
            events,
        });
        info!("conn[{}]: opened (peer={:?})", conn.id, conn.info.peer_addr);

        if let Some(h) = &conn.events {
            let guard = runtime::acquire();
            if let Err(e) = h.new_connection(&guard, &conn.context()) {
                error!("conn[{}]: new_connection handler failed: {}", conn.id, e);
            }
        }
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn event_loop(&self) -> &EventLoopHandle {
        &self.event_loop
    }

    /// Fresh context snapshot for one request.
    pub fn context(&self) -> ContextData {
        ContextData {
            peer_addr: self.info.peer_addr,
            local_addr: self.info.local_addr,
            client_identity: self.info.identity.clone(),
            ..ContextData::default()
        }
    }

    /// Mark inactive without notifying anybody.
    pub fn mark_inactive(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!("conn[{}]: inactive", self.id);
        }
    }

    /// Tear the connection down.  The event handler sees
    /// `connection_destroyed` once, under the runtime lock.
    pub fn close(&self) {
        self.mark_inactive();
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("conn[{}]: closed", self.id);
        if let Some(h) = &self.events {
            let guard = runtime::acquire();
            if let Err(e) = h.connection_destroyed(&guard, &self.context()) {
                error!("conn[{}]: connection_destroyed handler failed: {}", self.id, e);
            }
        }
    }

    /// Write one frame.  Loop thread only.  A failed write marks the
    /// connection inactive.
    pub(crate) fn write(&self, header: &Header, frame: &[u8]) {
        if !self.is_active() {
            debug!("conn[{}]: inactive, discarding {} bytes", self.id, frame.len());
            return;
        }
        if let Err(e) = self.transport.write(header, frame) {
            warn!("conn[{}]: write failed: {}", self.id, e);
            self.mark_inactive();
        }
    }
}

// ── Execution context ────────────────────────────────────────

/// Per-request context handed to the handler.
#[derive(Debug, Default)]
pub struct ContextData {
    peer_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    client_identity: String,
    header_ex: Mutex<String>,
    header_ex_what: Mutex<String>,
}

impl ContextData {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn client_identity(&self) -> &str {
        &self.client_identity
    }

    /// Exception category to attach to the reply (`uex`).
    pub fn set_header_ex(&self, value: impl Into<String>) {
        *self.header_ex.lock() = value.into();
    }

    /// Exception message to attach to the reply (`uexw`).
    pub fn set_header_ex_what(&self, value: impl Into<String>) {
        *self.header_ex_what.lock() = value.into();
    }

    pub fn header_ex(&self) -> String {
        self.header_ex.lock().clone()
    }

    pub fn header_ex_what(&self) -> String {
        self.header_ex_what.lock().clone()
    }
}
