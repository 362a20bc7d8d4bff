//! replid daemon - directory replication service
//!
//! One binary, two modes selected by configuration:
//!
//! - **server mode**: serves the replication API over a directory root,
//!   tracks peers in the registry, and sweeps liveness in the background;
//! - **node mode**: pulls from the configured servers until its local copy
//!   converges, heartbeating all the while.
//!
//! Both modes run until SIGTERM/SIGINT, propagated to every loop through a
//! `CancellationToken`. The only self-inflicted exits are the documented
//! fatal conditions: unusable configuration at startup, and (node mode)
//! every configured server offline at once.

use std::sync::Arc;

use anyhow::{Context, Result};
use replid_core::Config;
use replid_index::Snapshotter;
use replid_node::Orchestrator;
use replid_registry::PeerRegistry;
use replid_server::{ApiServer, ServerContext};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Waits for SIGTERM or SIGINT and cancels the token.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }

    token.cancel();
}

/// Server mode: API server plus the liveness sweep background task.
async fn run_server(config: Config, shutdown: CancellationToken) -> Result<()> {
    let server_config = config.server;

    let registry = Arc::new(
        PeerRegistry::load(&server_config.registry_path)
            .context("failed to load peer registry")?,
    );

    // The registry's own file must never appear in a snapshot, or every
    // node would pull it and re-trigger itself forever.
    let mut snapshotter = Snapshotter::new(&server_config.root);
    if let Some(name) = server_config.registry_path.file_name() {
        snapshotter = snapshotter.exclude(name.to_string_lossy());
    }

    let context = ServerContext::new(
        Arc::clone(&registry),
        snapshotter,
        server_config.registry_path.clone(),
        server_config.expose_peer_list,
    );
    let server = ApiServer::bind(&server_config.listen, context)
        .await
        .with_context(|| format!("failed to bind {}", server_config.listen))?;

    // Liveness sweep: flip stale peers offline on a fixed interval,
    // persisting whenever something changed.
    let sweep_registry = Arc::clone(&registry);
    let sweep_token = shutdown.clone();
    let offline_after = server_config.offline_after();
    let sweep_interval = server_config.sweep_interval();
    let registry_path = server_config.registry_path.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let flipped = sweep_registry.sweep(offline_after);
                    if flipped > 0 {
                        info!(flipped, "liveness sweep marked peers offline");
                        let registry = Arc::clone(&sweep_registry);
                        let path = registry_path.clone();
                        let persisted =
                            tokio::task::spawn_blocking(move || registry.persist(&path)).await;
                        match persisted {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => warn!(error = %e, "failed to persist registry after sweep"),
                            Err(e) => warn!(error = %e, "registry persist task failed"),
                        }
                    }
                }
                _ = sweep_token.cancelled() => break,
            }
        }
    });

    info!(
        root = %server_config.root.display(),
        listen = %server_config.listen,
        "running as server"
    );
    server.run(shutdown).await
}

/// Node mode: the orchestrator owns both loops.
async fn run_node(config: Config, shutdown: CancellationToken) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::new(config.node).context("failed to build node")?);
    info!(uuid = %orchestrator.uuid(), "running as node");
    orchestrator.run(shutdown).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(config_path = %config_path.display(), "replidd starting");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = if config.run_node {
        run_node(config, shutdown).await
    } else {
        run_server(config, shutdown).await
    };

    match &result {
        Ok(()) => info!("replidd shut down gracefully"),
        Err(e) => error!(error = format!("{e:#}"), "replidd exiting with error"),
    }
    result
}
