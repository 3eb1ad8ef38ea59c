//! One framed request and its lifecycle.
//!
//! ```text
//!  Received ──▶ Dispatched ──┬──▶ Completed
//!      │                     ├──▶ Errored
//!      └─────────────────────┴──▶ Dropped
//! ```
//!
//! Terminal transitions are compare-and-swap on a shared atomic, so a
//! request reaches exactly one terminal state.  A [`Request`] dropped
//! before reaching one is recorded as `Dropped`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use log::error;

use super::connection::Connection;
use super::header::Header;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Received = 0,
    Dispatched = 1,
    Completed = 2,
    Errored = 3,
    Dropped = 4,
}

impl RequestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Received,
            1 => Self::Dispatched,
            2 => Self::Completed,
            3 => Self::Errored,
            _ => Self::Dropped,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Errored | Self::Dropped)
    }
}

/// Shared view of a request's state; outlives the request itself.
#[derive(Debug, Clone)]
pub struct RequestStatus {
    state: Arc<AtomicU8>,
}

impl RequestStatus {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(RequestState::Received as u8)),
        }
    }

    pub fn get(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// `Received → Dispatched`.
    pub(crate) fn mark_dispatched(&self) -> bool {
        self.state
            .compare_exchange(
                RequestState::Received as u8,
                RequestState::Dispatched as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `terminal` from any non-terminal state.  `false` if the
    /// request already reached a terminal state.
    pub(crate) fn finish(&self, terminal: RequestState) -> bool {
        let mut cur = self.state.load(Ordering::Acquire);
        loop {
            if RequestState::from_u8(cur).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                cur,
                terminal as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }
}

pub struct Request {
    buf: Arc<[u8]>,
    header: Header,
    seq_id: i32,
    transport_oneway: bool,
    connection: Arc<Connection>,
    received_at: Instant,
    status: RequestStatus,
}

impl Request {
    /// `transport_oneway` is whether the transport framed the request
    /// as not expecting a reply.
    pub fn new(
        buf: impl Into<Arc<[u8]>>,
        header: Header,
        seq_id: i32,
        transport_oneway: bool,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            buf: buf.into(),
            header,
            seq_id,
            transport_oneway,
            connection,
            received_at: Instant::now(),
            status: RequestStatus::new(),
        }
    }

    pub fn buf(&self) -> &Arc<[u8]> {
        &self.buf
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    pub fn seq_id(&self) -> i32 {
        self.seq_id
    }

    pub fn is_transport_oneway(&self) -> bool {
        self.transport_oneway
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Request may still be answered.
    pub fn is_active(&self) -> bool {
        self.connection.is_active()
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    pub fn status(&self) -> RequestStatus {
        self.status.clone()
    }

    /// Record a terminal state; a second attempt is a bridge bug and is
    /// logged, never applied.
    pub(crate) fn finish(&self, terminal: RequestState) -> bool {
        if self.status.finish(terminal) {
            return true;
        }
        error!(
            "request[{}]: {:?} after terminal {:?}",
            self.seq_id,
            terminal,
            self.status.get()
        );
        false
    }
}

impl Drop for Request {
    fn drop(&mut self) {
        self.status.finish(RequestState::Dropped);
    }
}
