//! End-to-end replication: a real server, a real orchestrator, real files.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use replid_core::config::{NodeConfig, OfflineRecovery};
use replid_index::Snapshotter;
use replid_node::{Orchestrator, OrchestratorError};
use replid_registry::PeerRegistry;
use replid_server::{ApiServer, ServerContext};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct Fixture {
    server_root: TempDir,
    node_root: TempDir,
    address: String,
    registry: Arc<PeerRegistry>,
    shutdown: CancellationToken,
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn write_file(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

async fn start_fixture() -> Fixture {
    let server_root = TempDir::new().unwrap();
    write_file(server_root.path(), "a.txt", b"hello");
    write_file(server_root.path(), "sub/b.txt", b"world");

    let registry = Arc::new(PeerRegistry::new());
    let context = ServerContext::new(
        Arc::clone(&registry),
        Snapshotter::new(server_root.path()).exclude("peers.json"),
        server_root.path().join("peers.json"),
        false,
    );
    let server = ApiServer::bind("127.0.0.1:0", context).await.unwrap();
    let address = format!("http://{}", server.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        server.run(token).await.unwrap();
    });

    Fixture {
        server_root,
        node_root: TempDir::new().unwrap(),
        address,
        registry,
        shutdown,
    }
}

fn node_config(fixture: &Fixture) -> NodeConfig {
    NodeConfig {
        servers: vec![fixture.address.clone()],
        target: "/".to_string(),
        root: fixture.node_root.path().to_path_buf(),
        uuid_path: fixture.node_root.path().join("uuid.json"),
        max_missed_beats: 2,
        ..NodeConfig::default()
    }
}

#[tokio::test]
async fn full_cycle_converges_node_to_server() {
    let fixture = start_fixture().await;
    let orchestrator = Arc::new(Orchestrator::new(node_config(&fixture)).unwrap());

    orchestrator.handshake().await.unwrap();
    assert!(fixture.registry.contains(orchestrator.uuid()));

    // First cycle fetches everything and leaves the server unsynced.
    orchestrator.sync_once().await.unwrap();
    assert_eq!(
        fs::read(fixture.node_root.path().join("a.txt")).unwrap(),
        b"hello"
    );
    assert_eq!(
        fs::read(fixture.node_root.path().join("sub/b.txt")).unwrap(),
        b"world"
    );
    assert!(!orchestrator.states().all_synced());

    // Second cycle finds nothing to do and flips synced.
    orchestrator.sync_once().await.unwrap();
    assert!(orchestrator.states().all_synced());

    // A heartbeat now reports synced=true into the registry.
    orchestrator.heartbeat_once().await;
    assert!(fixture.registry.lookup(orchestrator.uuid()).unwrap().synced);
}

#[tokio::test]
async fn changed_remote_file_is_refetched() {
    let fixture = start_fixture().await;
    let orchestrator = Arc::new(Orchestrator::new(node_config(&fixture)).unwrap());
    orchestrator.handshake().await.unwrap();
    orchestrator.sync_once().await.unwrap();
    orchestrator.sync_once().await.unwrap();
    assert!(orchestrator.states().all_synced());

    write_file(fixture.server_root.path(), "a.txt", b"HELLO");
    orchestrator.sync_once().await.unwrap();
    assert_eq!(
        fs::read(fixture.node_root.path().join("a.txt")).unwrap(),
        b"HELLO"
    );
    // Out of sync until the next empty cycle.
    assert!(!orchestrator.states().all_synced());
    orchestrator.sync_once().await.unwrap();
    assert!(orchestrator.states().all_synced());
}

#[tokio::test]
async fn new_remote_directory_arrives_via_archive() {
    let fixture = start_fixture().await;
    let orchestrator = Arc::new(Orchestrator::new(node_config(&fixture)).unwrap());
    orchestrator.handshake().await.unwrap();
    orchestrator.sync_once().await.unwrap();

    write_file(fixture.server_root.path(), "fresh/deep/c.txt", b"below");
    orchestrator.sync_once().await.unwrap();

    assert_eq!(
        fs::read(fixture.node_root.path().join("fresh/deep/c.txt")).unwrap(),
        b"below"
    );
}

#[tokio::test]
async fn unidentified_node_gets_rejected_then_recovers_after_identify() {
    let fixture = start_fixture().await;
    let orchestrator = Arc::new(Orchestrator::new(node_config(&fixture)).unwrap());

    // No handshake: the index request is rejected and the server stays
    // unsynced, but nothing panics and nothing is written.
    orchestrator.sync_once().await.unwrap();
    assert!(!fixture.node_root.path().join("a.txt").exists());

    orchestrator.handshake().await.unwrap();
    orchestrator.sync_once().await.unwrap();
    assert!(fixture.node_root.path().join("a.txt").exists());
}

#[tokio::test]
async fn dead_server_goes_offline_and_sync_becomes_fatal() {
    let node_root = TempDir::new().unwrap();
    let config = NodeConfig {
        // Nothing listens on this port.
        servers: vec!["http://127.0.0.1:1".to_string()],
        target: "/".to_string(),
        root: node_root.path().to_path_buf(),
        uuid_path: node_root.path().join("uuid.json"),
        max_missed_beats: 2,
        ..NodeConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::new(config).unwrap());

    orchestrator.heartbeat_once().await;
    assert_eq!(orchestrator.states().online_count(), 1);
    orchestrator.heartbeat_once().await;
    assert_eq!(orchestrator.states().online_count(), 0);

    assert!(matches!(
        orchestrator.sync_once().await,
        Err(OrchestratorError::AllServersOffline)
    ));
}

#[tokio::test]
async fn heartbeat_policy_recovers_a_returning_server() {
    let fixture = start_fixture().await;
    let mut config = node_config(&fixture);
    config.offline_recovery = OfflineRecovery::Heartbeat;
    let orchestrator = Arc::new(Orchestrator::new(config).unwrap());
    orchestrator.handshake().await.unwrap();

    // Force the server offline, then let a successful heartbeat revive it.
    orchestrator
        .states()
        .record_heartbeat_failure(&fixture.address, 1);
    assert_eq!(orchestrator.states().online_count(), 0);

    orchestrator.heartbeat_once().await;
    assert_eq!(orchestrator.states().online_count(), 1);
}
