//! Node-side replication: transport client and sync orchestrator
//!
//! A node holds one [`Connection`] per configured server and drives the
//! per-server lifecycle: version handshake and identify at startup, then a
//! heartbeat loop and a periodic snapshot/diff/fetch cycle as independent
//! timer tasks. Per-server online/synced state lives in [`ServerStates`],
//! mutated by both loops under the same reader/writer discipline the
//! server-side registry uses. No lock is ever held across a network call.

pub mod connection;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod state;

pub use connection::Connection;
pub use error::{OrchestratorError, TransportError};
pub use identity::load_or_create_uuid;
pub use orchestrator::Orchestrator;
pub use state::{ServerState, ServerStates};
