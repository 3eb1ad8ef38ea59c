//! rpcbridge library.
//!
//! Dispatches framed RPC requests from a server's I/O layer to a handler
//! living in a foreign runtime that tolerates only one thread at a time,
//! and routes each reply back to the connection's own event loop.
//!
//! Entry points: [`bridge::Processor`] (per-request gateway),
//! [`dispatcher::build`] (worker pools) and [`config::BridgeConfig`].

#![deny(unused_must_use)]

pub mod app;
pub mod bridge;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod rpc;
pub mod runtime;

pub use bridge::{Processor, ProcessorOptions};
pub use error::{Error, Result};
