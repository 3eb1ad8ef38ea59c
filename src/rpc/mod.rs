//! Wire-side plumbing of the bridge.
//!
//! Knows how to peek at a framed request, carry its header, and get the
//! answer back onto the right connection thread.  Never decodes payloads.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      RPC side                              │
//! │                                                            │
//! │  ┌──────────┐   ┌──────────┐   ┌────────────────────────┐  │
//! │  │ Request  │──▶│ Envelope │──▶│  bridge::Processor     │  │
//! │  │ + Header │   │ (peek)   │   │  (priority, dispatch)  │  │
//! │  └──────────┘   └──────────┘   └────────────────────────┘  │
//! │                                            │               │
//! │       ┌────────────────────────────────────┘               │
//! │       ▼                                                    │
//! │  ┌──────────┐   ┌───────────┐   ┌──────────────────────┐   │
//! │  │  Reply   │──▶│ EventLoop │──▶│ Connection/Transport │   │
//! │  │ Channel  │   │ (1 thread)│   │ (write)              │   │
//! │  └──────────┘   └───────────┘   └──────────────────────┘   │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod connection;
pub mod envelope;
pub mod event_loop;
pub mod header;
pub mod reply;
pub mod request;
pub mod transform;
pub mod transport;
