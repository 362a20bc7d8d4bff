//! Peer records and the identify/heartbeat wire payloads
//!
//! A [`PeerRecord`] is the server's view of one node that has identified
//! itself at some point. Records are created on identify, refreshed on
//! every heartbeat, flipped offline by the liveness sweep, and never
//! deleted - the registry keeps the history of every peer that ever
//! connected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Peer-supplied metadata sent with an identify request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMetadata {
    /// The node's build version string.
    pub version: String,
    /// The directory the node replicates from this server.
    pub target: String,
}

/// One registered peer as tracked by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Network origin the peer last identified from.
    pub address: String,
    /// When the peer last identified or heartbeated successfully.
    pub last_seen_at: DateTime<Utc>,
    /// Whether the peer is considered alive.
    pub online: bool,
    /// The peer's self-reported synced flag from its last heartbeat.
    pub synced: bool,
    /// Version and target directory as reported by the peer.
    pub metadata: PeerMetadata,
}

impl PeerRecord {
    /// Creates a record for a peer that just identified: online, unsynced,
    /// seen now.
    pub fn new(address: impl Into<String>, metadata: PeerMetadata) -> Self {
        Self {
            address: address.into(),
            last_seen_at: Utc::now(),
            online: true,
            synced: false,
            metadata,
        }
    }
}

/// Body of `POST /v<major>/identify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyRequest {
    /// The peer's self-assigned id.
    pub uuid: String,
    /// The peer's build version.
    pub version: String,
    /// The directory the peer intends to replicate.
    pub target: String,
}

impl IdentifyRequest {
    /// Validates the peer id before it becomes a registry key.
    pub fn validate(&self) -> Result<(), super::DomainError> {
        if self.uuid.trim().is_empty() {
            return Err(super::DomainError::InvalidPeerId(self.uuid.clone()));
        }
        Ok(())
    }
}

/// Body of `POST /v<major>/heartbeat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// The peer's id, as previously identified.
    pub uuid: String,
    /// Whether the peer's last diff cycle against this server was empty.
    pub synced: bool,
}
