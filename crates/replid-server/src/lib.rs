//! HTTP API server for replid
//!
//! Serves the replication wire contract to nodes: `/version` plus the
//! versioned `identify`, `heartbeat`, `index`, `sync`, and `nodes`
//! endpoints. Every request is handled concurrently; registry access
//! follows the registry's lock discipline and filesystem work (walks,
//! packing) runs on the blocking pool.

pub mod api;
pub mod error;

pub use api::{ApiServer, ServerContext};
pub use error::error_response;
