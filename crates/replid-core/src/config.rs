//! Configuration for replid
//!
//! Typed structs mapping to the YAML configuration file, with loading,
//! defaults, and a platform-appropriate default path. One file configures
//! both modes; `run_node` selects which half the daemon runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Run as a node (pulling from servers) instead of a server.
    pub run_node: bool,
    pub server: ServerConfig,
    pub node: NodeConfig,
    pub logging: LoggingConfig,
}

/// Server-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory served to nodes.
    pub root: PathBuf,
    /// Address the API listens on.
    pub listen: String,
    /// Where the peer registry is persisted.
    pub registry_path: PathBuf,
    /// Whether `GET /v<major>/nodes` is routed at all. Off by default:
    /// the registry enumerates every peer address that ever connected.
    pub expose_peer_list: bool,
    /// Seconds without a heartbeat before a peer is flipped offline.
    pub offline_after_secs: u64,
    /// Seconds between liveness sweeps.
    pub sweep_interval_secs: u64,
}

/// How a node treats a server it has flagged offline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineRecovery {
    /// Stop heartbeating an offline server; only a fresh identify cycle
    /// brings it back.
    #[default]
    Reidentify,
    /// Keep heartbeating offline servers; one success resets the missed
    /// counter and flips the server back online.
    Heartbeat,
}

/// Node-mode settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Base URLs of the servers to replicate from.
    pub servers: Vec<String>,
    /// Directory to request from each server.
    pub target: String,
    /// Local directory the replicated tree is written into.
    pub root: PathBuf,
    /// Where the node's own uuid is persisted.
    pub uuid_path: PathBuf,
    /// Seconds between heartbeats.
    pub heartbeat_interval_secs: u64,
    /// Seconds between snapshot/diff/fetch cycles.
    pub update_interval_secs: u64,
    /// Consecutive missed heartbeats before a server is flagged offline.
    pub max_missed_beats: u32,
    /// Warn instead of failing on a protocol major mismatch.
    pub ignore_version_mismatch: bool,
    /// Recovery policy for servers flagged offline.
    pub offline_recovery: OfflineRecovery,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any
    /// error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Default path for the configuration file: `/etc/replid/config.yaml`,
    /// overridable with the `REPLID_CONFIG` environment variable.
    pub fn default_path() -> PathBuf {
        std::env::var_os("REPLID_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/etc/replid/config.yaml"))
    }
}

impl ServerConfig {
    /// The offline cutoff as a [`Duration`].
    pub fn offline_after(&self) -> Duration {
        Duration::from_secs(self.offline_after_secs)
    }

    /// The sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl NodeConfig {
    /// The heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// The sync-cycle interval as a [`Duration`].
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("/srv/replid"),
            listen: "0.0.0.0:8080".to_string(),
            registry_path: PathBuf::from("peers.json"),
            expose_peer_list: false,
            offline_after_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            target: "/".to_string(),
            root: PathBuf::from("/var/lib/replid"),
            uuid_path: PathBuf::from("uuid.json"),
            heartbeat_interval_secs: 30,
            update_interval_secs: 60,
            max_missed_beats: 5,
            ignore_version_mismatch: false,
            offline_recovery: OfflineRecovery::Reidentify,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.run_node);
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.node.max_missed_beats, 5);
        assert_eq!(config.node.offline_recovery, OfflineRecovery::Reidentify);
        assert!(config.node.heartbeat_interval() < config.node.update_interval());
    }

    #[test]
    fn test_load_partial_yaml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "run_node: true\nnode:\n  servers: [\"http://server-a:8080\"]\n  target: \"/\""
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.run_node);
        assert_eq!(config.node.servers, vec!["http://server-a:8080"]);
        // Untouched sections keep their defaults.
        assert_eq!(config.server.offline_after_secs, 60);
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(Config::load(Path::new("/nonexistent/replid.yaml")).is_err());
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/replid.yaml"));
        assert!(!config.run_node);
    }

    #[test]
    fn test_offline_recovery_parses_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "node:\n  offline_recovery: heartbeat").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.node.offline_recovery, OfflineRecovery::Heartbeat);
    }
}
