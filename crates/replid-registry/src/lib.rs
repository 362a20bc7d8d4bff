//! Peer registry
//!
//! The server's record of every node that has ever identified itself:
//! address, last-seen time, online and synced flags, and peer-supplied
//! metadata. The registry owns its lock; callers only see the operations,
//! never the map. Records are created on identify, refreshed on heartbeat,
//! flipped offline by the liveness sweep, and never deleted.
//!
//! Lock discipline: the internal `RwLock` is held only across the
//! in-memory read or mutation, never across file or network I/O.
//! Persistence serializes under a read lock and writes the file after the
//! lock is released.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use replid_core::PeerRecord;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised by registry persistence.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Reading or writing the registry file failed.
    #[error("registry file error at {path}: {source}")]
    Io {
        /// The file path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The registry file held invalid JSON.
    #[error("registry file is not valid JSON: {0}")]
    Corrupt(#[source] serde_json::Error),
}

/// Concurrency-safe store of peer records, keyed by peer id.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: RwLock<HashMap<String, PeerRecord>>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a registry from `path`, or returns an empty one if the file
    /// does not exist yet.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let peers: HashMap<String, PeerRecord> =
                    serde_json::from_str(&content).map_err(RegistryError::Corrupt)?;
                info!(path = %path.display(), peers = peers.len(), "loaded peer registry");
                Ok(Self {
                    peers: RwLock::new(peers),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no peer registry on disk, starting empty");
                Ok(Self::new())
            }
            Err(e) => Err(RegistryError::Io {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Inserts or overwrites the record for `id`.
    pub fn register(&self, id: impl Into<String>, record: PeerRecord) {
        let id = id.into();
        info!(peer = %id, address = %record.address, "registering peer");
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        peers.insert(id, record);
    }

    /// Returns a copy of the record for `id`, if present.
    pub fn lookup(&self, id: &str) -> Option<PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.get(id).cloned()
    }

    /// Whether `id` has ever identified.
    pub fn contains(&self, id: &str) -> bool {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.contains_key(id)
    }

    /// Records a heartbeat: online, seen now, synced as reported.
    ///
    /// Returns `false` when `id` is unknown; the API layer turns that into
    /// an authorization error.
    pub fn mark_heartbeat(&self, id: &str, synced: bool) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get_mut(id) {
            Some(record) => {
                record.online = true;
                record.synced = synced;
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Refreshes liveness for `id` without touching its synced flag, for
    /// authenticated requests that are not heartbeats.
    ///
    /// Returns `false` when `id` is unknown.
    pub fn touch(&self, id: &str) -> bool {
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        match peers.get_mut(id) {
            Some(record) => {
                record.online = true;
                record.last_seen_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Flips `online=false` on every record whose `last_seen_at` is older
    /// than `offline_after`. Returns how many records flipped.
    pub fn sweep(&self, offline_after: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(offline_after).unwrap_or(chrono::Duration::zero());
        let mut flipped = 0;
        let mut peers = self.peers.write().unwrap_or_else(|e| e.into_inner());
        for (id, record) in peers.iter_mut() {
            if record.online && record.last_seen_at < cutoff {
                warn!(peer = %id, last_seen = %record.last_seen_at, "peer missed its heartbeat window, marking offline");
                record.online = false;
                flipped += 1;
            }
        }
        flipped
    }

    /// A point-in-time copy of every record, for the `/nodes` endpoint.
    pub fn snapshot(&self) -> HashMap<String, PeerRecord> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.clone()
    }

    /// Number of records (including offline ones).
    pub fn len(&self) -> usize {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        peers.len()
    }

    /// Whether the registry has never seen a peer.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes the whole registry to pretty JSON.
    pub fn to_json(&self) -> Result<String, RegistryError> {
        let peers = self.peers.read().unwrap_or_else(|e| e.into_inner());
        serde_json::to_string_pretty(&*peers).map_err(RegistryError::Corrupt)
    }

    /// Writes the registry to `path` atomically (temp file + rename).
    ///
    /// The serialization happens under a read lock; the file write happens
    /// after the lock is dropped.
    pub fn persist(&self, path: &Path) -> Result<(), RegistryError> {
        let serialized = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serialized).map_err(|e| RegistryError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, path).map_err(|e| RegistryError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }
}
