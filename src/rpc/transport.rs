//! Reply transport abstraction: the write side of a connection.
//!
//! Concrete implementations live with the server's socket layer.  The
//! bridge only ever calls [`ReplyTransport::write`], and only from the
//! connection's event-loop thread.  The header travels with the frame so
//! the transport can serialize `uex`/`uexw` and the transform list.

use log::debug;

use super::header::Header;
use crate::error::TransportError;

/// Byte-oriented, frame-at-a-time write channel to one peer.
pub trait ReplyTransport: Send + Sync {
    /// Write one complete reply frame under `header`.
    fn write(&self, header: &Header, frame: &[u8]) -> Result<(), TransportError>;
}

/// A null transport that discards all writes.
/// Useful as a default when nothing is listening on the other end.
pub struct NullTransport;

impl ReplyTransport for NullTransport {
    fn write(&self, _header: &Header, frame: &[u8]) -> Result<(), TransportError> {
        debug!("transport: discarding {} byte frame", frame.len());
        Ok(())
    }
}
