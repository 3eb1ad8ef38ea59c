//! Application boundary: what the foreign runtime must provide.
//!
//! The bridge never calls into the foreign runtime directly; it goes
//! through the **port traits** defined in [`ports`], keeping the dispatch
//! path fully testable with plain Rust mocks.

pub mod ports;
