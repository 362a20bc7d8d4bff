//! replid Core - Domain types and configuration
//!
//! This crate contains the pieces every other replid crate builds on:
//! - **Snapshot model** - the checksummed [`Entry`](domain::Entry) tree a
//!   directory walk produces
//! - **Peer model** - [`PeerRecord`](domain::PeerRecord) plus the identify
//!   and heartbeat wire payloads
//! - **Version info** - the protocol/build identifiers served on `/version`
//! - **Configuration** - the typed YAML config shared by server and node
//!
//! The domain module is pure data: no I/O, no locks, no async. Engines
//! (index, archive, registry, node) live in their own crates.

pub mod config;
pub mod domain;

pub use config::Config;
pub use domain::{
    DomainError, Entry, ErrorPayload, HeartbeatRequest, IdentifyRequest, PeerMetadata, PeerRecord,
    Snapshot, VersionInfo, PROTOCOL_VERSION,
};
