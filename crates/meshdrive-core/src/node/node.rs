//! The node. Owns the swarm, the log store, every per-peer request/response
//! channel, and the public API surface.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use meshdrive_crypto::{Keypair, PeerId};
use meshdrive_discovery::{Swarm, SwarmEvent};
use meshdrive_transport::{
    BlobId, Dispatcher, LogStore, RequestChannel, Response, ResponseStatus,
};
use meshdrive_transport::memory::LocalRequestChannel;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::events::{Event, EventBus};
use crate::index_manager::{FileTransferClient, IndexManager, NetworkFiles, NonLocalFile, TransferRef};
use crate::lfi::LocalFileIndex;
use crate::messages::{MessageHandler, MessageRouter};
use crate::node::config::NodeConfig;
use crate::node::error::NodeError;
use crate::node::save_data::SaveData;
use crate::transfer_table::{Direction, TransferTable};

use meshdrive_files::FileRecord;

/// Introspection detail for one connected peer, as returned by `list_peers`.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// The peer's id.
    pub peer: PeerId,
    /// When this connection was established.
    pub connected_since: Instant,
    /// The last version of the peer's log this node has fully processed,
    /// if the peer's log has been registered with the index manager.
    pub remote_log_version: Option<u64>,
}

struct PeerChannel {
    channel: Arc<dyn RequestChannel>,
    connected_since: Instant,
}

/// Forwards inbound requests to a [`Node`] that may not exist yet at the
/// time the swarm is constructed. Breaks the swarm/node construction cycle
/// the same way the index manager's injected [`FileTransferClient`] breaks
/// the IM/node cycle (§9 "Graph cycles").
struct NodeDispatcher {
    node: OnceLock<Weak<Node>>,
}

impl NodeDispatcher {
    fn new() -> Arc<Self> {
        Arc::new(Self { node: OnceLock::new() })
    }

    fn bind(&self, node: Weak<Node>) {
        let _ = self.node.set(node);
    }
}

#[async_trait]
impl Dispatcher for NodeDispatcher {
    async fn dispatch(&self, from: PeerId, method: &str, payload: Value) -> Response {
        match self.node.get().and_then(Weak::upgrade) {
            Some(node) => node.dispatch_protocol(from, method, payload).await,
            None => Response::error("node is not ready"),
        }
    }
}

/// The client-side collaborator the index manager uses to reach peers over
/// this node's request/response channels (§9's injected pair of
/// `send_file_request`/`send_file_release` collaborators).
struct NodeTransferClient {
    node: Weak<Node>,
}

#[async_trait]
impl FileTransferClient for NodeTransferClient {
    async fn send_file_request(&self, peer: PeerId, path: &str) -> Result<TransferRef, NodeError> {
        let node = self.node.upgrade().ok_or(NodeError::Cancelled)?;
        node.request_file(peer, path).await
    }

    async fn send_file_release(&self, peer: PeerId, path: &str) -> Result<(), NodeError> {
        let node = self.node.upgrade().ok_or(NodeError::Cancelled)?;
        node.release_file(peer, path).await
    }
}

/// The node (component F): owns the swarm, the log store, the local file
/// index, the index manager, every per-peer request/response channel, and
/// dispatches the wire protocol. This is the type applications construct
/// and drive.
pub struct Node {
    identity: Keypair,
    config: NodeConfig,
    network_key: RwLock<[u8; 32]>,
    events: EventBus,
    log_store: Arc<dyn LogStore>,
    swarm: Arc<dyn Swarm>,
    lfi: Arc<LocalFileIndex>,
    index_manager: Arc<IndexManager>,
    transfers: Arc<TransferTable>,
    messages: Arc<MessageRouter>,
    channels: DashMap<PeerId, PeerChannel>,
    connection_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Node {
    /// Bring up a node: open the local log and file index, construct the
    /// index manager, and build the swarm via `build_swarm` — which
    /// receives this node's peer id and a [`Dispatcher`] it can hand to the
    /// transport so inbound requests route back here (§4.F "open()").
    ///
    /// Before this returns, only the configured values (`config`,
    /// `network_key`) are visible; no connection has been attempted.
    pub async fn open(
        seed: [u8; 32],
        network_key: [u8; 32],
        queued_downloads: BTreeSet<String>,
        config: NodeConfig,
        log_store: Arc<dyn LogStore>,
        build_swarm: impl FnOnce(PeerId, Arc<dyn Dispatcher>) -> Arc<dyn Swarm>,
    ) -> Result<Arc<Self>, NodeError> {
        let identity = Keypair::from_seed(seed);
        let events = EventBus::default();
        let transfers = TransferTable::new();

        let local_log = log_store.local().await?;
        let lfi = LocalFileIndex::open(
            config.watch_path.clone(),
            local_log,
            transfers.clone(),
            events.clone(),
            config.index.clone(),
        )
        .await?;

        let index_manager = IndexManager::new(
            lfi.clone(),
            log_store.clone(),
            events.clone(),
            transfers.clone(),
            config.transfer.clone(),
            config.index.relay_interval(),
            config.index.archive,
        );
        index_manager.restore_queued(queued_downloads).await;

        let dispatcher = NodeDispatcher::new();
        let swarm = build_swarm(identity.peer_id(), dispatcher.clone());

        let node = Arc::new(Self {
            identity,
            config,
            network_key: RwLock::new(network_key),
            events,
            log_store,
            swarm,
            lfi,
            index_manager,
            transfers,
            messages: Arc::new(MessageRouter::new()),
            channels: DashMap::new(),
            connection_task: std::sync::Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        dispatcher.bind(Arc::downgrade(&node));

        let client = Arc::new(NodeTransferClient { node: Arc::downgrade(&node) });
        node.index_manager.set_client(client).await;

        node.clone().spawn_connection_loop();

        Ok(node)
    }

    /// This node's own peer id.
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.identity.peer_id()
    }

    /// Subscribe to the public event bus (§6).
    #[must_use]
    pub fn events(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Join (or create) the discovery topic. `network_key = None` rejoins
    /// whatever topic this node was last configured with; `Some(key)`
    /// switches to a new topic. Flushes discovery so the connection
    /// callback is primed, then emits `SAVE_DATA_UPDATE` (§4.F).
    pub async fn join(&self, network_key: Option<[u8; 32]>) -> Result<[u8; 32], NodeError> {
        if let Some(key) = network_key {
            *self.network_key.write().await = key;
        }
        let key = *self.network_key.read().await;
        self.swarm.join(key).await?;
        self.swarm.flushed().await?;
        self.emit_save_data_update().await;
        Ok(key)
    }

    /// Tear down the swarm, then the index manager, then the local log
    /// (§4.F "close()"). Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.connection_task.lock().expect("connection_task mutex poisoned").take() {
            task.abort();
        }

        self.index_manager.deactivate_archive().await;

        for (path, entries) in self.transfers.snapshot() {
            for entry in entries {
                if entry.direction == Direction::Download {
                    let _ = self.release_file(entry.peer, &path).await;
                    self.events.emit(Event::DownloadFailed {
                        peer: entry.peer,
                        path: path.clone(),
                        reason: NodeError::Cancelled.to_string(),
                    });
                } else {
                    self.index_manager.close_upload(&path, entry.peer, true);
                }
            }
        }
        self.transfers.clear();

        self.lfi.close();

        let key = *self.network_key.read().await;
        let _ = self.swarm.leave(key).await;
    }

    /// The client side of a file transfer: request → download → release, a
    /// convenience chaining the three protocol steps for a caller that just
    /// wants `path` from `peer` (§4.F "Public API").
    pub async fn download_file_from_peer(&self, peer: PeerId, path: &str) -> Result<(), NodeError> {
        self.index_manager.request_and_download(peer, path).await
    }

    /// Send a user-defined message to `peer` and await its response (§4.F
    /// `MESSAGE`). Errors are surfaced to the caller and also emitted as an
    /// `ERROR` event.
    pub async fn send_message(&self, peer: PeerId, message_type: &str, payload: Value) -> Result<Value, NodeError> {
        let result = self.send_message_inner(peer, message_type, payload).await;
        if let Err(err) = &result {
            self.events.emit(Event::Error { message: format!("send_message to {peer}: {err}") });
        }
        result
    }

    async fn send_message_inner(&self, peer: PeerId, message_type: &str, payload: Value) -> Result<Value, NodeError> {
        let channel = self.channel_for(peer)?;
        let envelope = channel
            .request("MESSAGE", serde_json::json!({"type": message_type, "payload": payload}))
            .await?;
        match envelope.status {
            ResponseStatus::Success => Ok(envelope.data),
            ResponseStatus::UnknownMessageType => Err(NodeError::UnknownMessageType(message_type.to_string().into())),
            ResponseStatus::Error => {
                let message = envelope.data.as_str().map(str::to_string).unwrap_or_else(|| envelope.data.to_string());
                Err(NodeError::ProtocolError(message.into()))
            }
        }
    }

    /// Register a persistent handler for `message_type` (§4.F "listen").
    pub async fn listen(&self, message_type: impl Into<String>, handler: MessageHandler) {
        self.messages.listen(message_type, handler).await;
    }

    /// Register a handler for `message_type` that fires at most once
    /// (§4.F "listen_once").
    pub async fn listen_once(&self, message_type: impl Into<String>, handler: MessageHandler) {
        self.messages.listen_once(message_type, handler).await;
    }

    /// Remove a persistent handler for `message_type` (§4.F "unlisten").
    pub async fn unlisten(&self, message_type: &str) {
        self.messages.unlisten(message_type).await;
    }

    /// Enable archive mode and emit `SAVE_DATA_UPDATE`.
    pub async fn activate_archive(&self) {
        self.index_manager.activate_archive().await;
        self.emit_save_data_update().await;
    }

    /// Disable archive mode and emit `SAVE_DATA_UPDATE`.
    pub async fn deactivate_archive(&self) {
        self.index_manager.deactivate_archive().await;
        self.emit_save_data_update().await;
    }

    /// Queue `path` for automatic download the next time any peer
    /// advertises it, and emit `SAVE_DATA_UPDATE`.
    pub async fn queue_download(&self, path: &str) {
        self.index_manager.queue_download(path).await;
        self.emit_save_data_update().await;
    }

    /// Every currently connected peer, with connection age and last
    /// processed log version.
    #[must_use]
    pub fn list_peers(&self) -> Vec<PeerInfo> {
        self.channels
            .iter()
            .map(|entry| PeerInfo {
                peer: *entry.key(),
                connected_since: entry.value().connected_since,
                remote_log_version: self.index_manager.peer_version(*entry.key()),
            })
            .collect()
    }

    /// This node's own indexed files.
    pub async fn list_local_files(&self) -> Vec<FileRecord> {
        self.index_manager.list_local().await
    }

    /// The full network view: this node's files plus every peer's.
    pub async fn list_network_files(&self) -> Result<NetworkFiles, NodeError> {
        self.index_manager.list_network().await
    }

    /// Every file advertised by a peer but not present locally.
    pub async fn list_non_local_files(&self) -> Result<Vec<NonLocalFile>, NodeError> {
        self.index_manager.list_nonlocal().await
    }

    /// Reconstruct the boot configuration plus the union of in-progress and
    /// queued downloads (§3 "Save data", §4.F "save_data view").
    pub async fn save_data(&self) -> SaveData {
        let mut queued = self.index_manager.queued_downloads().await;
        for (path, entries) in self.transfers.snapshot() {
            if entries.iter().any(|e| e.direction == Direction::Download) {
                queued.insert(path);
            }
        }

        let mut index = self.config.index.clone();
        index.archive = self.index_manager.archive_enabled();

        SaveData {
            seed: *self.identity.seed(),
            network_key: *self.network_key.read().await,
            watch_path: self.config.watch_path.clone(),
            corestore_path: self.config.corestore_path.clone(),
            index,
            queued_downloads: queued,
        }
    }

    async fn emit_save_data_update(&self) {
        let data = self.save_data().await;
        let value = serde_json::to_value(&data).unwrap_or(Value::Null);
        self.events.emit(Event::SaveDataUpdate { save_data: value });
    }

    fn channel_for(&self, peer: PeerId) -> Result<Arc<dyn RequestChannel>, NodeError> {
        self.channels
            .get(&peer)
            .map(|entry| entry.value().channel.clone())
            .ok_or_else(|| NodeError::NoPeer(peer.to_string().into()))
    }

    async fn request_file(&self, peer: PeerId, path: &str) -> Result<TransferRef, NodeError> {
        let channel = self.channel_for(peer)?;
        let envelope = channel.request("FILE_REQUEST", serde_json::json!({"path": path})).await?;
        match envelope.status {
            ResponseStatus::Success => parse_transfer_ref(&envelope.data),
            ResponseStatus::Error => {
                let message = envelope.data.as_str().map(str::to_string).unwrap_or_else(|| envelope.data.to_string());
                Err(NodeError::NotFound(message.into()))
            }
            ResponseStatus::UnknownMessageType => {
                Err(NodeError::ProtocolError("peer does not support FILE_REQUEST".into()))
            }
        }
    }

    async fn release_file(&self, peer: PeerId, path: &str) -> Result<(), NodeError> {
        let channel = self.channel_for(peer)?;
        channel.request("FILE_RELEASE", serde_json::json!({"path": path})).await?;
        Ok(())
    }

    /// The peer-side dispatch of every wire protocol method (§4.F "Protocol
    /// methods"). Never lets an internal error escape across the wire:
    /// failures become an error-status response and an `ERROR` event.
    async fn dispatch_protocol(&self, from: PeerId, method: &str, payload: Value) -> Response {
        match method {
            "LOCAL_INDEX_KEY_REQUEST" => match self.log_store.local().await {
                Ok(log) => Response::success(Value::String(hex::encode(log.key()))),
                Err(err) => self.fail(from, method, err.into()),
            },
            "FILE_REQUEST" => {
                let Some(path) = payload.get("path").and_then(Value::as_str) else {
                    return Response::error("missing path");
                };
                match self.index_manager.create_upload(path, from).await {
                    Ok(transfer) => Response::success(serde_json::json!({
                        "type": "hyperblobs",
                        "key": hex::encode(transfer.key),
                        "id": transfer.id,
                    })),
                    Err(err) => self.fail(from, method, err),
                }
            }
            "FILE_RELEASE" => {
                let Some(path) = payload.get("path").and_then(Value::as_str) else {
                    return Response::error("missing path");
                };
                self.index_manager.close_upload(path, from, true);
                Response::success(Value::Null)
            }
            "MESSAGE" => {
                let message_type = payload.get("type").and_then(Value::as_str).unwrap_or_default();
                let inner = payload.get("payload").cloned().unwrap_or(Value::Null);
                match self.messages.dispatch(from, message_type, inner).await {
                    Ok(data) => Response::success(data),
                    Err(NodeError::UnknownMessageType(_)) => Response::unknown_message_type(),
                    Err(err) => self.fail(from, method, err),
                }
            }
            _ => Response::unknown_message_type(),
        }
    }

    fn fail(&self, peer: PeerId, method: &str, err: NodeError) -> Response {
        self.events.emit(Event::Error { message: format!("{method} from {peer}: {err}") });
        Response::error(err.to_string())
    }

    fn spawn_connection_loop(self: Arc<Self>) {
        let mut events = self.swarm.events();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    SwarmEvent::Connected { peer, dispatcher } => this.clone().handle_connected(peer, dispatcher).await,
                    SwarmEvent::Disconnected { peer } => this.handle_disconnected(peer),
                }
            }
        });
        *self.connection_task.lock().expect("connection_task mutex poisoned") = Some(handle);
    }

    async fn handle_connected(self: Arc<Self>, peer: PeerId, dispatcher: Arc<dyn Dispatcher>) {
        let channel: Arc<dyn RequestChannel> = Arc::new(LocalRequestChannel::new(self.identity.peer_id(), dispatcher));
        self.channels.insert(peer, PeerChannel { channel: channel.clone(), connected_since: Instant::now() });
        self.events.emit(Event::PeerConnected { peer });

        if let Err(err) = self.register_peer_log(peer, channel.as_ref()).await {
            tracing::warn!(%peer, error = %err, "failed to register peer's log");
            self.events.emit(Event::Error { message: format!("failed to register {peer}'s log: {err}") });
        }
    }

    async fn register_peer_log(&self, peer: PeerId, channel: &dyn RequestChannel) -> Result<(), NodeError> {
        let envelope = channel.request("LOCAL_INDEX_KEY_REQUEST", Value::Null).await?;
        let key_hex = envelope.data.as_str().ok_or_else(|| NodeError::ProtocolError("missing log key".into()))?;
        let key = meshdrive_files::hash::hash_from_hex(key_hex).map_err(NodeError::from)?;
        let log = self.log_store.open(key).await?;
        self.index_manager.add_peer(peer, log).await
    }

    fn handle_disconnected(&self, peer: PeerId) {
        self.channels.remove(&peer);
        self.index_manager.remove_peer(peer);
        self.events.emit(Event::PeerDisconnected { peer });
    }
}

fn parse_transfer_ref(data: &Value) -> Result<TransferRef, NodeError> {
    let invalid = || NodeError::InvalidReference(data.to_string().into());

    let obj = data.as_object().ok_or_else(invalid)?;
    if obj.get("type").and_then(Value::as_str) != Some("hyperblobs") {
        return Err(invalid());
    }
    let key_hex = obj.get("key").and_then(Value::as_str).ok_or_else(invalid)?;
    let key = meshdrive_files::hash::hash_from_hex(key_hex).map_err(|_| invalid())?;
    let id = obj.get("id").and_then(Value::as_u64).ok_or_else(invalid)?;
    Ok(TransferRef { key, id: BlobId(id) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshdrive_discovery::{LocalSwarm, Rendezvous};
    use meshdrive_transport::memory::{MemoryLogStore, MemoryNetwork};
    use tokio::time::{timeout, Duration};

    fn node_config(watch_path: std::path::PathBuf) -> NodeConfig {
        use crate::node::config::{IndexConfig, LoggingConfig, TransferConfig};
        NodeConfig {
            corestore_path: watch_path.join(".meshdrive"),
            watch_path,
            index: IndexConfig { archive: false, poll_interval: Duration::from_millis(30), watch_enabled: false },
            transfer: TransferConfig { inactivity_timeout: Duration::from_secs(5), progress_milestone_pct: 1 },
            logging: LoggingConfig::default(),
        }
    }

    async fn open_node(
        seed: [u8; 32],
        watch_dir: &std::path::Path,
        network: Arc<MemoryNetwork>,
        rendezvous: Arc<Rendezvous>,
    ) -> Arc<Node> {
        let log_store = MemoryLogStore::new(network, seed);
        Node::open(seed, [9u8; 32], BTreeSet::new(), node_config(watch_dir.to_path_buf()), log_store, move |peer_id, dispatcher| {
            LocalSwarm::new(rendezvous, peer_id, dispatcher)
        })
        .await
        .unwrap()
    }

    async fn wait_for_peer(node: &Node, peer: PeerId) {
        for _ in 0..200 {
            if node.list_peers().iter().any(|p| p.peer == peer) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("peer {peer} never connected");
    }

    #[tokio::test]
    async fn two_peer_happy_path_downloads_a_file() {
        let network = MemoryNetwork::new();
        let rendezvous = Rendezvous::new();

        let a_dir = tempfile::tempdir().unwrap();
        tokio::fs::write(a_dir.path().join("a.txt"), b"0123456789").await.unwrap();
        let a = open_node([1u8; 32], a_dir.path(), network.clone(), rendezvous.clone()).await;

        let b_dir = tempfile::tempdir().unwrap();
        let b = open_node([2u8; 32], b_dir.path(), network, rendezvous).await;

        a.join(Some([5u8; 32])).await.unwrap();
        b.join(Some([5u8; 32])).await.unwrap();

        wait_for_peer(&a, b.peer_id()).await;
        wait_for_peer(&b, a.peer_id()).await;

        let network_files = timeout(Duration::from_secs(2), async {
            loop {
                let files = b.list_network_files().await.unwrap();
                if files.peers.get(&a.peer_id()).map(|f| !f.is_empty()).unwrap_or(false) {
                    return files;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(network_files.peers[&a.peer_id()][0].path, "a.txt");

        b.download_file_from_peer(a.peer_id(), "a.txt").await.unwrap();
        let bytes = tokio::fs::read(b_dir.path().join("a.txt")).await.unwrap();
        assert_eq!(bytes, b"0123456789");

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn custom_message_round_trips() {
        let network = MemoryNetwork::new();
        let rendezvous = Rendezvous::new();

        let a_dir = tempfile::tempdir().unwrap();
        let a = open_node([11u8; 32], a_dir.path(), network.clone(), rendezvous.clone()).await;
        let b_dir = tempfile::tempdir().unwrap();
        let b = open_node([12u8; 32], b_dir.path(), network, rendezvous).await;

        b.listen("echo", Arc::new(|_peer, payload| serde_json::json!({"ok": true, "echo": payload}))).await;

        a.join(Some([6u8; 32])).await.unwrap();
        b.join(Some([6u8; 32])).await.unwrap();
        wait_for_peer(&a, b.peer_id()).await;

        let response = a.send_message(b.peer_id(), "echo", serde_json::json!({"n": 1})).await.unwrap();
        assert_eq!(response, serde_json::json!({"ok": true, "echo": {"n": 1}}));

        let err = a.send_message(b.peer_id(), "missing", serde_json::json!(0)).await.unwrap_err();
        assert!(matches!(err, NodeError::UnknownMessageType(_)));

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn send_message_to_unconnected_peer_is_no_peer() {
        let network = MemoryNetwork::new();
        let rendezvous = Rendezvous::new();
        let a_dir = tempfile::tempdir().unwrap();
        let a = open_node([21u8; 32], a_dir.path(), network, rendezvous).await;

        let stranger = PeerId::from_bytes([99u8; 32]);
        let err = a.send_message(stranger, "hello", Value::Null).await.unwrap_err();
        assert!(matches!(err, NodeError::NoPeer(_)));
        a.close().await;
    }

    #[tokio::test]
    async fn save_data_round_trips_configuration() {
        let network = MemoryNetwork::new();
        let rendezvous = Rendezvous::new();
        let dir = tempfile::tempdir().unwrap();
        let node = open_node([31u8; 32], dir.path(), network, rendezvous).await;

        node.queue_download("later.txt").await;
        let data = node.save_data().await;
        assert_eq!(data.seed, [31u8; 32]);
        assert!(data.queued_downloads.contains("later.txt"));
        node.close().await;
    }
}
