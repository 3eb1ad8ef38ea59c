//! Reply channel: final disposition of a request.
//!
//! Every disposition consumes the channel, so a request can be answered
//! at most once by construction.  Delivery and release of the request
//! always happen on the connection's event loop:
//!
//! ```text
//!  any thread                        connection event loop
//!  ──────────                        ─────────────────────
//!  send_reply(frame) ─┐
//!  send_error(err)  ──┼─ run_in_loop ─▶ active? ── yes ─▶ transport.write
//!  drop_request()   ──┘                   │ no
//!                                         ▼
//!                                   discard, release request
//! ```
//!
//! Oneway channels never write.

use log::{debug, error, warn};

use super::envelope;
use super::request::{Request, RequestState};
use super::transform;
use crate::error::AppError;

pub struct ReplyChannel {
    request: Request,
    method: String,
    oneway: bool,
}

impl ReplyChannel {
    pub fn new(request: Request, method: impl Into<String>, oneway: bool) -> Self {
        Self {
            request,
            method: method.into(),
            oneway,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn is_oneway(&self) -> bool {
        self.oneway
    }

    /// Deliver a successful (already transformed) reply frame.
    pub fn send_reply(self, frame: Vec<u8>) {
        let Self {
            request, oneway, ..
        } = self;
        if !request.finish(RequestState::Completed) {
            return;
        }
        let event_loop = request.connection().event_loop().clone();
        event_loop.run_in_loop(move || {
            if oneway {
                debug!("reply: oneway request {}, nothing to send", request.seq_id());
            } else {
                request.connection().write(request.header(), &frame);
            }
            drop(request);
        });
    }

    /// Deliver an application exception instead of a reply.
    pub fn send_error(self, err: AppError) {
        let Self {
            mut request,
            method,
            oneway,
        } = self;
        if !request.finish(RequestState::Errored) {
            return;
        }
        if oneway {
            warn!("reply: oneway {} failed, not replying: {}", method, err.message);
        }

        let frame = if oneway {
            None
        } else {
            encode_error(&mut request, &method, &err)
        };
        let event_loop = request.connection().event_loop().clone();
        event_loop.run_in_loop(move || {
            if let Some(frame) = frame {
                request.connection().write(request.header(), &frame);
            }
            drop(request);
        });
    }

    /// Release the request without replying.
    pub fn drop_request(self) {
        let request = self.request;
        if !request.finish(RequestState::Dropped) {
            return;
        }
        let event_loop = request.connection().event_loop().clone();
        event_loop.run_in_loop(move || drop(request));
    }
}

/// Encode `err` in the request's protocol and apply the header's write
/// transforms.  If they fail, the frame goes out plain and the header
/// stops advertising them.
fn encode_error(request: &mut Request, method: &str, err: &AppError) -> Option<Vec<u8>> {
    let seq_id = request.seq_id();
    let header = request.header_mut();
    let protocol = match header.protocol() {
        Ok(p) => p,
        Err(e) => {
            error!("reply: cannot encode exception for {}: {}", method, e);
            return None;
        }
    };
    let frame = envelope::encode_exception(protocol, method, seq_id, err);
    match transform::apply(
        frame.clone(),
        header.write_transforms(),
        header.min_compress_bytes(),
    ) {
        Ok(out) => Some(out),
        Err(e) => {
            warn!("reply: exception transform failed, sending plain: {}", e);
            header.set_write_transforms(Vec::new());
            Some(frame)
        }
    }
}

/// Empty reply for a method the handler declares oneway but the
/// transport framed as two-way.  Does not dispose of the request.
pub fn send_oneway_ack(request: &Request) {
    let conn = request.connection().clone();
    let header = request.header().clone();
    conn.event_loop()
        .clone()
        .run_in_loop(move || conn.write(&header, &[]));
}
