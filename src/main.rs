//! rpcbridge: demo entry point.
//!
//! Wires the whole bridge together against an in-process echo handler and
//! a loopback connection, pushes a few requests through, and prints the
//! dispatcher counters.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  main                                                        │
//! │   ├─ BridgeConfig::load(argv[1]) / default                   │
//! │   ├─ dispatcher::build ──▶ worker pool(s)                    │
//! │   ├─ Processor::new(EchoAdapter)                             │
//! │   ├─ EventLoop "rpc-io" + Connection(LogTransport)           │
//! │   ├─ process(echo | ping | health)                           │
//! │   └─ shutdown: drain pool, close conn, stop loop             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use tracing_subscriber::EnvFilter;

use rpcbridge::app::ports::{HandlerAdapter, HandlerCall};
use rpcbridge::bridge::callback::ForeignValue;
use rpcbridge::config::BridgeConfig;
use rpcbridge::dispatcher;
use rpcbridge::error::{HandlerError, TransportError};
use rpcbridge::rpc::connection::{Connection, PeerInfo};
use rpcbridge::rpc::envelope::{self, MessageType};
use rpcbridge::rpc::event_loop::EventLoop;
use rpcbridge::rpc::header::{HEADER_EX, Header, ProtocolId};
use rpcbridge::rpc::request::Request;
use rpcbridge::rpc::transport::ReplyTransport;
use rpcbridge::runtime::RuntimeGuard;
use rpcbridge::{Processor, ProcessorOptions};

// ── Demo handler ─────────────────────────────────────────────

/// Replies with the request bytes; `ping` is oneway, `health` jumps the
/// queue.
struct EchoAdapter;

impl HandlerAdapter for EchoAdapter {
    fn oneway_methods(&self, _guard: &RuntimeGuard<'_>) -> Result<Vec<String>, HandlerError> {
        Ok(vec!["ping".into()])
    }

    fn priority_of(&self, _guard: &RuntimeGuard<'_>, method: &str) -> Result<i32, HandlerError> {
        Ok(if method == "health" { 0 } else { 3 })
    }

    fn dispatch(&self, _guard: &RuntimeGuard<'_>, call: HandlerCall) -> Result<(), HandlerError> {
        let out = if call.input.is_empty() {
            ForeignValue::None
        } else {
            ForeignValue::Bytes(call.input.to_vec())
        };
        if let Err(e) = call.callback.call(out) {
            warn!("demo: {}", e);
        }
        Ok(())
    }
}

struct LogTransport;

impl ReplyTransport for LogTransport {
    fn write(&self, header: &Header, frame: &[u8]) -> Result<(), TransportError> {
        info!(
            "demo: reply frame {} bytes (uex={:?})",
            frame.len(),
            header.get(HEADER_EX)
        );
        Ok(())
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_logging();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            BridgeConfig::load(&path).with_context(|| format!("loading config {path}"))?
        }
        None => BridgeConfig::default(),
    };
    info!("rpcbridge starting: {:?}", config.dispatcher.kind);

    let dispatcher = dispatcher::build(&config.dispatcher).context("starting dispatcher")?;
    let processor = Processor::new(
        Arc::new(EchoAdapter),
        dispatcher.clone(),
        ProcessorOptions::from(&config),
    );

    let event_loop = EventLoop::spawn("rpc-io").context("spawning event loop")?;
    let conn = Connection::open(
        PeerInfo {
            peer_addr: Some(SocketAddr::from(([127, 0, 0, 1], 9090))),
            local_addr: None,
            identity: "demo".into(),
        },
        event_loop.handle(),
        Arc::new(LogTransport),
        None,
    );

    let calls = [
        ("echo", MessageType::Call),
        ("ping", MessageType::Oneway),
        ("health", MessageType::Call),
    ];
    for (seq_id, (name, kind)) in (1..).zip(calls) {
        let mut buf = envelope::encode_message_begin(ProtocolId::Compact, name, kind, seq_id);
        buf.push(0); // empty argument struct
        let req = Request::new(
            buf,
            Header::new(ProtocolId::Compact),
            seq_id,
            kind == MessageType::Oneway,
            conn.clone(),
        );
        if let Err(e) = processor.process(req) {
            warn!("demo: {} rejected: {}", name, e);
        }
    }

    processor.shutdown(true);
    info!(
        "dispatcher: completed={} expired={} pending={}",
        dispatcher.total_task_count(),
        dispatcher.expired_task_count(),
        dispatcher.pending_task_count()
    );

    conn.close();
    event_loop.shutdown();
    Ok(())
}
