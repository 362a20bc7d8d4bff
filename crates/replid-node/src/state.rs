//! Per-server connection state
//!
//! One [`ServerState`] per configured server, owned by [`ServerStates`]
//! behind a reader/writer lock. The heartbeat loop mutates the missed
//! counter and online flag; the sync loop mutates the synced flag and
//! reads online. State is rebuilt from configuration on restart, never
//! persisted.

use std::collections::HashMap;
use std::sync::RwLock;

use replid_core::config::OfflineRecovery;
use tracing::{info, warn};

/// The node's view of one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerState {
    /// The server's base address.
    pub address: String,
    /// Consecutive failed heartbeats; reset by a success.
    pub missed_heartbeats: u32,
    /// False once the missed counter reaches the configured maximum.
    pub online: bool,
    /// True only while the last diff cycle against this server was empty.
    pub synced: bool,
}

impl ServerState {
    fn new(address: String) -> Self {
        Self {
            address,
            missed_heartbeats: 0,
            online: true,
            synced: false,
        }
    }
}

/// Lock-owning map of server states, keyed by address.
#[derive(Debug, Default)]
pub struct ServerStates {
    inner: RwLock<HashMap<String, ServerState>>,
}

impl ServerStates {
    /// Creates the state map from the configured server addresses; every
    /// server starts online and unsynced.
    pub fn new(addresses: impl IntoIterator<Item = String>) -> Self {
        let inner = addresses
            .into_iter()
            .map(|address| (address.clone(), ServerState::new(address)))
            .collect();
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Addresses the heartbeat loop should contact this tick. Offline
    /// servers are skipped under [`OfflineRecovery::Reidentify`] and kept
    /// under [`OfflineRecovery::Heartbeat`]. Returns `(address, synced)`
    /// pairs so the heartbeat can carry the per-server synced flag.
    pub fn heartbeat_targets(&self, policy: OfflineRecovery) -> Vec<(String, bool)> {
        let states = self.inner.read().unwrap_or_else(|e| e.into_inner());
        states
            .values()
            .filter(|s| s.online || policy == OfflineRecovery::Heartbeat)
            .map(|s| (s.address.clone(), s.synced))
            .collect()
    }

    /// Addresses currently flagged online.
    pub fn online_addresses(&self) -> Vec<String> {
        let states = self.inner.read().unwrap_or_else(|e| e.into_inner());
        states
            .values()
            .filter(|s| s.online)
            .map(|s| s.address.clone())
            .collect()
    }

    /// How many servers are currently flagged online.
    pub fn online_count(&self) -> usize {
        let states = self.inner.read().unwrap_or_else(|e| e.into_inner());
        states.values().filter(|s| s.online).count()
    }

    /// Records a successful heartbeat: the missed counter resets, and the
    /// server comes back online when the recovery policy allows it.
    pub fn record_heartbeat_success(&self, address: &str, policy: OfflineRecovery) {
        let mut states = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(address) {
            state.missed_heartbeats = 0;
            if !state.online && policy == OfflineRecovery::Heartbeat {
                info!(server = %address, "server has come back online");
                state.online = true;
            }
        }
    }

    /// Records a failed heartbeat; flips the server offline (and unsynced)
    /// when the counter reaches `max_missed`. Returns true when this call
    /// did the flip.
    pub fn record_heartbeat_failure(&self, address: &str, max_missed: u32) -> bool {
        let mut states = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(state) = states.get_mut(address) else {
            return false;
        };
        state.missed_heartbeats += 1;
        if state.online && state.missed_heartbeats >= max_missed {
            warn!(
                server = %address,
                missed = state.missed_heartbeats,
                "server has missed the maximum heartbeats, marking offline"
            );
            state.online = false;
            state.synced = false;
            return true;
        }
        false
    }

    /// Sets the synced flag after a diff cycle.
    pub fn set_synced(&self, address: &str, synced: bool) {
        let mut states = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(address) {
            if state.synced != synced {
                match synced {
                    true => info!(server = %address, "in sync"),
                    false => info!(server = %address, "out of sync"),
                }
            }
            state.synced = synced;
        }
    }

    /// Whether the node considers every listed server synced.
    pub fn all_synced(&self) -> bool {
        let states = self.inner.read().unwrap_or_else(|e| e.into_inner());
        !states.is_empty() && states.values().all(|s| s.synced || !s.online)
    }

    /// A point-in-time copy of every state.
    pub fn snapshot(&self) -> Vec<ServerState> {
        let states = self.inner.read().unwrap_or_else(|e| e.into_inner());
        states.values().cloned().collect()
    }
}
