//! End-to-end scenarios against two nodes wired through the in-memory
//! swarm and log-store reference implementations: nested-path replication
//! and archive mode's automatic pull. The node-open/download/message
//! happy path and its error cases live in `src/node/node.rs`'s own test
//! module; this file covers the scenarios that need two independently
//! driven `IndexManager`s running their background poll/archive loops.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use meshdrive_core::{IndexConfig, LoggingConfig, Node, NodeConfig, TransferConfig};
use meshdrive_crypto::PeerId;
use meshdrive_discovery::{LocalSwarm, Rendezvous};
use meshdrive_transport::memory::{MemoryLogStore, MemoryNetwork};
use tokio::time::timeout;

fn node_config(watch_path: std::path::PathBuf, archive: bool) -> NodeConfig {
    NodeConfig {
        corestore_path: watch_path.join(".meshdrive"),
        watch_path,
        index: IndexConfig { archive, poll_interval: Duration::from_millis(25), watch_enabled: false },
        transfer: TransferConfig { inactivity_timeout: Duration::from_secs(5), progress_milestone_pct: 10 },
        logging: LoggingConfig::default(),
    }
}

async fn open_node(
    seed: [u8; 32],
    watch_dir: &std::path::Path,
    network: Arc<MemoryNetwork>,
    rendezvous: Arc<Rendezvous>,
    archive: bool,
) -> Arc<Node> {
    let log_store = MemoryLogStore::new(network, seed);
    Node::open(seed, [42u8; 32], BTreeSet::new(), node_config(watch_dir.to_path_buf(), archive), log_store, move |peer_id, dispatcher| {
        LocalSwarm::new(rendezvous, peer_id, dispatcher)
    })
    .await
    .unwrap()
}

async fn wait_for_peer(node: &Node, peer: PeerId) {
    timeout(Duration::from_secs(2), async {
        loop {
            if node.list_peers().iter().any(|p| p.peer == peer) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("peer never connected");
}

#[tokio::test]
async fn nested_directory_structure_is_preserved_across_a_download() {
    let network = MemoryNetwork::new();
    let rendezvous = Rendezvous::new();

    let a_dir = tempfile::tempdir().unwrap();
    tokio::fs::create_dir_all(a_dir.path().join("docs/2026")).await.unwrap();
    tokio::fs::write(a_dir.path().join("docs/2026/report.txt"), b"quarterly numbers").await.unwrap();
    let a = open_node([101u8; 32], a_dir.path(), network.clone(), rendezvous.clone(), false).await;

    let b_dir = tempfile::tempdir().unwrap();
    let b = open_node([102u8; 32], b_dir.path(), network, rendezvous, false).await;

    a.join(Some([7u8; 32])).await.unwrap();
    b.join(Some([7u8; 32])).await.unwrap();
    wait_for_peer(&a, b.peer_id()).await;
    wait_for_peer(&b, a.peer_id()).await;

    timeout(Duration::from_secs(2), async {
        loop {
            let files = b.list_network_files().await.unwrap();
            if files.peers.get(&a.peer_id()).map(|f| !f.is_empty()).unwrap_or(false) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    b.download_file_from_peer(a.peer_id(), "docs/2026/report.txt").await.unwrap();

    let bytes = tokio::fs::read(b_dir.path().join("docs/2026/report.txt")).await.unwrap();
    assert_eq!(bytes, b"quarterly numbers");

    a.close().await;
    b.close().await;
}

#[tokio::test]
async fn archive_mode_pulls_new_peer_files_without_an_explicit_request() {
    let network = MemoryNetwork::new();
    let rendezvous = Rendezvous::new();

    let a_dir = tempfile::tempdir().unwrap();
    let a = open_node([111u8; 32], a_dir.path(), network.clone(), rendezvous.clone(), false).await;

    let b_dir = tempfile::tempdir().unwrap();
    let b = open_node([112u8; 32], b_dir.path(), network, rendezvous, true).await;

    a.join(Some([8u8; 32])).await.unwrap();
    b.join(Some([8u8; 32])).await.unwrap();
    wait_for_peer(&a, b.peer_id()).await;
    wait_for_peer(&b, a.peer_id()).await;

    tokio::fs::write(a_dir.path().join("archived.bin"), vec![9u8; 4096]).await.unwrap();

    timeout(Duration::from_secs(3), async {
        loop {
            if tokio::fs::metadata(b_dir.path().join("archived.bin")).await.is_ok() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    })
    .await
    .expect("archive mode never pulled the new file");

    let bytes = tokio::fs::read(b_dir.path().join("archived.bin")).await.unwrap();
    assert_eq!(bytes, vec![9u8; 4096]);

    a.close().await;
    b.close().await;
}
