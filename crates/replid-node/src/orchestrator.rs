//! The sync orchestrator
//!
//! Drives the per-server lifecycle: version handshake and identify at
//! startup, then two independent timer loops until shutdown:
//!
//! - the **heartbeat loop** reports liveness and the per-server synced
//!   flag, counting misses and flagging servers offline;
//! - the **sync loop** runs the snapshot/diff/fetch cycle against every
//!   online server.
//!
//! Every configured server being offline at once is fatal: there is
//! nothing left to converge against and the daemon exits.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use anyhow::Context;
use replid_core::config::NodeConfig;
use replid_core::{Entry, HeartbeatRequest, IdentifyRequest, Snapshot, VersionInfo};
use replid_index::{IndexError, Snapshotter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::OrchestratorError;
use crate::identity::load_or_create_uuid;
use crate::state::ServerStates;

/// Node-side orchestrator: one instance per process.
pub struct Orchestrator {
    config: NodeConfig,
    uuid: String,
    connections: HashMap<String, Connection>,
    states: ServerStates,
    snapshotter: Snapshotter,
}

impl Orchestrator {
    /// Builds the orchestrator from node configuration: loads or creates
    /// the persisted uuid and sets up one connection per server.
    pub fn new(config: NodeConfig) -> Result<Self, OrchestratorError> {
        if config.servers.is_empty() {
            return Err(OrchestratorError::NoServers);
        }
        let uuid = load_or_create_uuid(&config.uuid_path)?;

        let connections = config
            .servers
            .iter()
            .map(|address| (address.clone(), Connection::new(address.clone())))
            .collect();
        let states = ServerStates::new(config.servers.iter().cloned());

        // Keep the node's own state file out of its snapshots, or every
        // uuid rewrite would look like a local change.
        let mut snapshotter = Snapshotter::new(&config.root);
        if let Some(name) = config.uuid_path.file_name() {
            snapshotter = snapshotter.exclude(name.to_string_lossy());
        }

        Ok(Self {
            config,
            uuid,
            connections,
            states,
            snapshotter,
        })
    }

    /// The node's peer id.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Per-server connection state, for status reporting and tests.
    pub fn states(&self) -> &ServerStates {
        &self.states
    }

    /// Version handshake and identify with every configured server.
    ///
    /// A protocol-major mismatch fails unless `ignore_version_mismatch` is
    /// set. Transport failures are logged and counted, never fatal here -
    /// the heartbeat loop decides when a server is gone.
    pub async fn handshake(&self) -> Result<(), OrchestratorError> {
        let local = VersionInfo::current();
        for (address, connection) in &self.connections {
            match connection.request_version().await {
                Ok(remote) => {
                    if !local.compatible_with(&remote) {
                        if self.config.ignore_version_mismatch {
                            warn!(
                                server = %address,
                                local = %local.protocol,
                                remote = %remote.protocol,
                                "protocol version mismatch, continuing anyway"
                            );
                        } else {
                            return Err(OrchestratorError::VersionMismatch {
                                address: address.clone(),
                                local: local.protocol.clone(),
                                remote: remote.protocol,
                            });
                        }
                    }
                }
                Err(e) => {
                    warn!(server = %address, error = %e, "version request failed");
                    self.states
                        .record_heartbeat_failure(address, self.config.max_missed_beats);
                    continue;
                }
            }

            let request = IdentifyRequest {
                uuid: self.uuid.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                target: self.config.target.clone(),
            };
            match connection.identify(&request).await {
                Ok(()) => info!(server = %address, "identified"),
                Err(e) => {
                    warn!(server = %address, error = %e, "identify failed");
                    self.states
                        .record_heartbeat_failure(address, self.config.max_missed_beats);
                }
            }
        }
        Ok(())
    }

    /// Runs the handshake, then both loops, until shutdown or a fatal
    /// condition. The heartbeat loop is its own task so a slow sync cycle
    /// can never fake missed heartbeats.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), OrchestratorError> {
        self.handshake().await?;

        let heartbeat_task = {
            let this = Arc::clone(&self);
            let token = shutdown.clone();
            tokio::spawn(async move { this.heartbeat_loop(token).await })
        };

        let result = self.sync_loop(shutdown.clone()).await;

        // Sync loop ending (fatal or shutdown) takes the heartbeat with it.
        shutdown.cancel();
        let _ = heartbeat_task.await;
        result
    }

    async fn heartbeat_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());
        interval.tick().await;
        info!(
            interval_secs = self.config.heartbeat_interval_secs,
            "heartbeat loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => self.heartbeat_once().await,
                _ = shutdown.cancelled() => {
                    info!("heartbeat loop stopping");
                    break;
                }
            }
        }
    }

    /// One heartbeat tick: contact every eligible server concurrently.
    pub async fn heartbeat_once(self: &Arc<Self>) {
        let policy = self.config.offline_recovery;
        let targets = self.states.heartbeat_targets(policy);

        let mut tasks = Vec::with_capacity(targets.len());
        for (address, synced) in targets {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                let Some(connection) = this.connections.get(&address) else {
                    return;
                };
                let request = HeartbeatRequest {
                    uuid: this.uuid.clone(),
                    synced,
                };
                match connection.heartbeat(&request).await {
                    Ok(()) => this.states.record_heartbeat_success(&address, policy),
                    Err(e) => {
                        warn!(server = %address, error = %e, "heartbeat failed");
                        this.states
                            .record_heartbeat_failure(&address, this.config.max_missed_beats);
                    }
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn sync_loop(
        self: &Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let mut interval = tokio::time::interval(self.config.update_interval());
        interval.tick().await;
        info!(
            interval_secs = self.config.update_interval_secs,
            servers = self.connections.len(),
            "sync loop started"
        );
        loop {
            tokio::select! {
                _ = interval.tick() => self.sync_once().await?,
                _ = shutdown.cancelled() => {
                    info!("sync loop stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One sync tick: snapshot/diff/fetch against every online server
    /// concurrently, so one slow server cannot stall the rest.
    ///
    /// Fails only when every configured server is offline.
    pub async fn sync_once(self: &Arc<Self>) -> Result<(), OrchestratorError> {
        let online = self.states.online_addresses();
        if online.is_empty() {
            return Err(OrchestratorError::AllServersOffline);
        }

        let mut tasks = Vec::with_capacity(online.len());
        for address in online {
            let this = Arc::clone(self);
            tasks.push(tokio::spawn(async move {
                match this.sync_with(&address).await {
                    Ok(synced) => this.states.set_synced(&address, synced),
                    Err(e) => {
                        warn!(server = %address, error = %e, "sync cycle failed");
                        this.states.set_synced(&address, false);
                    }
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    /// Full cycle against one server. Returns whether the need-list came
    /// back empty.
    async fn sync_with(&self, address: &str) -> anyhow::Result<bool> {
        let connection = self
            .connections
            .get(address)
            .context("no connection for address")?;

        let remote = connection
            .request_index(&self.uuid, &self.config.target)
            .await?;
        let local = self.local_snapshot().await?;

        let need = replid_index::compare(&local, &remote);
        if need.is_empty() {
            debug!(server = %address, "nothing needed");
            return Ok(true);
        }

        info!(server = %address, needed = need.len(), "fetching needed entries");
        for entry in &need {
            self.apply_need(connection, entry)
                .await
                .with_context(|| format!("applying {}", entry.path))?;
        }
        // Unsynced until a later cycle's need-list comes back empty.
        Ok(false)
    }

    /// Snapshots the target path locally. A target that does not exist yet
    /// is an empty tree, not an error - everything remote is needed.
    async fn local_snapshot(&self) -> anyhow::Result<Snapshot> {
        let snapshotter = self.snapshotter.clone();
        let target = self.config.target.clone();
        let walked =
            tokio::task::spawn_blocking(move || snapshotter.snapshot(&target)).await?;
        match walked {
            Ok(snapshot) => Ok(snapshot),
            Err(IndexError::NotFound(_)) => Ok(Snapshot::new()),
            Err(e) => Err(e).context("local snapshot failed"),
        }
    }

    /// Fetches one needed entry and writes it into the local root.
    async fn apply_need(&self, connection: &Connection, entry: &Entry) -> anyhow::Result<()> {
        let relative = entry.path.trim_start_matches('/');
        let dest = self.config.root.join(relative);

        // A type flip (file became directory or vice versa) has to clear
        // the old object before the new one can land.
        match tokio::fs::symlink_metadata(&dest).await {
            Ok(meta) if meta.is_dir() != entry.is_dir => {
                if meta.is_dir() {
                    tokio::fs::remove_dir_all(&dest).await?;
                } else {
                    tokio::fs::remove_file(&dest).await?;
                }
            }
            _ => {}
        }

        if entry.is_dir {
            let stream = connection.fetch_dir(&self.uuid, &entry.path).await?;
            let root = self.config.root.clone();
            tokio::task::spawn_blocking(move || replid_archive::unpack(stream.as_slice(), &root))
                .await??;
        } else {
            let content = connection.fetch_file(&self.uuid, &entry.path).await?;
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&dest, &content).await?;
            // Mode goes on after the content is fully written.
            tokio::fs::set_permissions(&dest, std::fs::Permissions::from_mode(entry.mode & 0o777))
                .await?;
        }
        debug!(path = %entry.path, "applied");
        Ok(())
    }
}
