//! Component E: the index manager. Aggregates every remote peer's log into
//! a coherent view and drives all file transfers (§4.E).

use std::borrow::Cow;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use meshdrive_crypto::PeerId;
use meshdrive_files::FileRecord;
use meshdrive_transport::blob_store::{BlobReader, BlobWriter};
use meshdrive_transport::{BlobId, BlobStore, LogHandle, LogStore};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::events::{Event, EventBus};
use crate::lfi::LocalFileIndex;
use crate::node::config::TransferConfig;
use crate::node::error::NodeError;
use crate::transfer_table::{Direction, TransferTable};

/// The `{key, id}` transfer object handed back by `FILE_REQUEST` and
/// consumed by `handle_download` (§3 "Transfer object", §6 wire protocol).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TransferRef {
    /// The uploader's blob container's public key.
    #[serde(with = "hex_key")]
    pub key: [u8; 32],
    /// The blob's locator within that container.
    pub id: BlobId,
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("key is not 32 bytes"))
    }
}

/// The pair of collaborators the IM uses to talk to a remote peer over the
/// Node's request/response channel, injected so the IM never holds a
/// back-reference to the Node itself (§9 "Graph cycles").
#[async_trait]
pub trait FileTransferClient: Send + Sync {
    /// Send `FILE_REQUEST(path)` to `peer` and return its transfer object.
    async fn send_file_request(&self, peer: PeerId, path: &str) -> Result<TransferRef, NodeError>;

    /// Send `FILE_RELEASE(path)` to `peer`.
    async fn send_file_release(&self, peer: PeerId, path: &str) -> Result<(), NodeError>;
}

/// A snapshot of the full network view: this node's own files plus every
/// connected peer's advertised files, keyed by peer id (§4.E `list_network`,
/// scenario 1).
#[derive(Clone, Debug, Default)]
pub struct NetworkFiles {
    /// This node's own files.
    pub local: Vec<FileRecord>,
    /// Every connected peer's advertised files.
    pub peers: std::collections::BTreeMap<PeerId, Vec<FileRecord>>,
}

/// One file advertised by a peer but not present locally (§4.E
/// `list_nonlocal`, archive mode's candidate set).
#[derive(Clone, Debug)]
pub struct NonLocalFile {
    /// The path, relative to the watch root.
    pub path: String,
    /// The peer advertising it.
    pub peer: PeerId,
    /// The peer's recorded hash for the path.
    pub hash: String,
}

struct PeerState {
    log: Arc<dyn LogHandle>,
    last_version: AtomicU64,
    task: JoinHandle<()>,
}

/// The index manager (component E): holds remote log handles, runs the
/// per-peer diff engine, and owns upload/download/archive/queued-download
/// orchestration.
pub struct IndexManager {
    local: Arc<LocalFileIndex>,
    log_store: Arc<dyn LogStore>,
    events: EventBus,
    transfers: Arc<TransferTable>,
    peers: DashMap<PeerId, PeerState>,
    queued: RwLock<BTreeSet<String>>,
    client: RwLock<Option<Arc<dyn FileTransferClient>>>,
    /// Active upload containers, keyed by path, kept alive until release.
    uploads: DashMap<String, Arc<dyn BlobStore>>,
    inactivity_timeout: Duration,
    progress_milestone_pct: u64,
    archive_enabled: AtomicBool,
    archive_running: Arc<AtomicBool>,
    archive_task: RwLock<Option<JoinHandle<()>>>,
    relay_interval: Duration,
}

impl IndexManager {
    /// Build an index manager over `local`'s files and `log_store`'s
    /// namespace, with no peers registered yet.
    #[must_use]
    pub fn new(
        local: Arc<LocalFileIndex>,
        log_store: Arc<dyn LogStore>,
        events: EventBus,
        transfers: Arc<TransferTable>,
        config: TransferConfig,
        relay_interval: Duration,
        archive_enabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            log_store,
            events,
            transfers,
            peers: DashMap::new(),
            queued: RwLock::new(BTreeSet::new()),
            client: RwLock::new(None),
            uploads: DashMap::new(),
            inactivity_timeout: config.inactivity_timeout,
            progress_milestone_pct: u64::from(config.progress_milestone_pct),
            archive_enabled: AtomicBool::new(archive_enabled),
            archive_running: Arc::new(AtomicBool::new(false)),
            archive_task: RwLock::new(None),
            relay_interval,
        })
    }

    /// Wire in the collaborator used to talk to peers. Must be called
    /// before any upload/download/archive activity (the Node does this
    /// immediately after constructing both itself and the IM).
    pub async fn set_client(&self, client: Arc<dyn FileTransferClient>) {
        *self.client.write().await = Some(client);
        if self.archive_enabled.load(Ordering::SeqCst) {
            self.start_archive_loop_if_needed().await;
        }
    }

    async fn client(&self) -> Result<Arc<dyn FileTransferClient>, NodeError> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| NodeError::ProtocolError(Cow::Borrowed("index manager has no transfer client wired")))
    }

    /// Register a peer's log handle, subscribe to its append stream, and
    /// record the current version as the baseline (§4.E `add_peer`).
    pub async fn add_peer(self: &Arc<Self>, peer: PeerId, log: Arc<dyn LogHandle>) -> Result<(), NodeError> {
        log.ready().await?;
        let baseline = log.version();
        let mut rx = log.subscribe_append();

        let this = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if let Err(err) = this.diff_walk(peer).await {
                    tracing::warn!(%peer, error = %err, "diff walk failed");
                    this.events.emit(Event::Error { message: format!("diff walk for {peer}: {err}") });
                }
            }
        });

        self.peers.insert(peer, PeerState { log, last_version: AtomicU64::new(baseline), task });
        Ok(())
    }

    /// Drop a peer's registration; its log entries remain on disk but stop
    /// being tracked (§3 "Lifecycle").
    pub fn remove_peer(&self, peer: PeerId) {
        if let Some((_, state)) = self.peers.remove(&peer) {
            state.task.abort();
        }
    }

    async fn diff_walk(self: &Arc<Self>, peer: PeerId) -> Result<(), NodeError> {
        let log = {
            let Some(state) = self.peers.get(&peer) else { return Ok(()) };
            state.log.clone()
        };
        log.update().await?;

        let since = self.peers.get(&peer).map(|s| s.last_version.load(Ordering::SeqCst)).unwrap_or(0);
        let diffs = log.diff_since(since).await?;

        for entry in diffs {
            match (entry.left, entry.right) {
                (None, Some(right)) => {
                    self.events.emit(Event::PeerFileAdded { path: entry.path.clone(), peer, hash: right.hash });
                    self.trigger_if_queued(peer, &entry.path).await;
                }
                (Some(_), None) => {
                    self.events.emit(Event::PeerFileRemoved { path: entry.path, peer });
                }
                (Some(left), Some(right)) if left.hash != right.hash => {
                    self.events.emit(Event::PeerFileChanged {
                        path: entry.path,
                        peer,
                        prev_hash: left.hash,
                        hash: right.hash,
                    });
                }
                _ => {}
            }
        }

        if let Some(state) = self.peers.get(&peer) {
            state.last_version.store(log.version(), Ordering::SeqCst);
        }
        Ok(())
    }

    /// Snapshot of this node's own indexed files.
    pub async fn list_local(&self) -> Vec<FileRecord> {
        self.local.list().await
    }

    /// The last-observed version of a registered peer's log, for
    /// introspection (`Node::list_peers`). `None` if the peer is not
    /// registered.
    #[must_use]
    pub fn peer_version(&self, peer: PeerId) -> Option<u64> {
        self.peers.get(&peer).map(|state| state.last_version.load(Ordering::SeqCst))
    }

    /// Snapshot of one peer's advertised files.
    pub async fn list_peer(&self, peer: PeerId) -> Result<Vec<FileRecord>, NodeError> {
        let log = {
            let state = self.peers.get(&peer).ok_or_else(|| NodeError::NoPeer(Cow::Owned(peer.to_string())))?;
            state.log.clone()
        };
        Ok(log.list().await?)
    }

    /// Snapshot of the full network view (§4.E `list_network`).
    pub async fn list_network(&self) -> Result<NetworkFiles, NodeError> {
        let mut peers = std::collections::BTreeMap::new();
        for entry in self.peers.iter() {
            let peer = *entry.key();
            let files = entry.value().log.list().await?;
            peers.insert(peer, files);
        }
        Ok(NetworkFiles { local: self.list_local().await, peers })
    }

    /// Every path advertised by some peer but absent locally, one entry per
    /// `(path, peer)` pair (§4.E `list_nonlocal`).
    pub async fn list_nonlocal(&self) -> Result<Vec<NonLocalFile>, NodeError> {
        let local: BTreeSet<String> = self.list_local().await.into_iter().map(|r| r.path).collect();
        let mut out = Vec::new();
        for entry in self.peers.iter() {
            let peer = *entry.key();
            for record in entry.value().log.list().await? {
                if !local.contains(&record.path) {
                    out.push(NonLocalFile { path: record.path, peer, hash: record.hash });
                }
            }
        }
        Ok(out)
    }

    async fn trigger_if_queued(self: &Arc<Self>, peer: PeerId, path: &str) {
        let was_queued = {
            let mut queued = self.queued.write().await;
            queued.remove(path)
        };
        if was_queued {
            let this = self.clone();
            let path = path.to_string();
            tokio::spawn(async move {
                if let Err(err) = this.request_and_download(peer, &path).await {
                    tracing::warn!(%peer, path, error = %err, "queued download failed");
                    this.events.emit(Event::DownloadFailed { peer, path, reason: err.to_string() });
                }
            });
        }
    }

    /// Add `path` to the queued-download set (§4.E `queue_download`).
    /// Synchronous per §5 ("does not suspend") other than the lock
    /// acquisition.
    pub async fn queue_download(&self, path: &str) {
        self.queued.write().await.insert(path.to_string());
    }

    /// The current queued-download set, for `save_data` reconstruction.
    pub async fn queued_downloads(&self) -> BTreeSet<String> {
        self.queued.read().await.clone()
    }

    /// Replace the queued set wholesale, used when restoring from save-data
    /// on `open()`.
    pub async fn restore_queued(&self, queued: BTreeSet<String>) {
        *self.queued.write().await = queued;
    }

    /// The server side of a file transfer: verify `path` is indexed
    /// locally, mark it busy, copy its bytes into a fresh per-transfer blob
    /// container (§4.E "Upload preparation").
    pub async fn create_upload(&self, path: &str, requester: PeerId) -> Result<TransferRef, NodeError> {
        let record = self
            .local
            .get(path)
            .await
            .ok_or_else(|| NodeError::NotFound(Cow::Owned(path.to_string())))?;

        self.transfers.start(path, requester, Direction::Upload);

        let namespace = format!("upload/{requester}/{path}");
        let blob_store = self.log_store.blob_store(&namespace);
        let result = self.copy_file_into_blob(&record, blob_store.as_ref()).await;

        match result {
            Ok((id, _size)) => {
                let key = blob_store.key();
                self.uploads.insert(path.to_string(), blob_store);
                Ok(TransferRef { key, id })
            }
            Err(err) => {
                self.transfers.stop(path, requester, true);
                Err(err)
            }
        }
    }

    async fn copy_file_into_blob(
        &self,
        record: &FileRecord,
        blob_store: &dyn BlobStore,
    ) -> Result<(BlobId, u64), NodeError> {
        let full_path = meshdrive_files::path::to_absolute(self.local.watch_path(), &record.path);
        let mut file = tokio::fs::File::open(&full_path).await?;
        let mut writer = blob_store.create_write_stream().await?;

        let mut buf = vec![0u8; meshdrive_files::hash::CHUNK_SIZE];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n]).await?;
        }
        Ok(writer.finish().await?)
    }

    /// Unmark an upload and tear down its container. Refuses unless `force`
    /// or no active transfers remain for `path` (§4.E `close_upload`).
    pub fn close_upload(&self, path: &str, peer: PeerId, force: bool) -> bool {
        if !self.transfers.stop(path, peer, force) {
            return false;
        }
        self.uploads.remove(path);
        true
    }

    /// The client side of a file transfer: mark `path` busy for download,
    /// open the peer's blob container, stream its bytes to the local watch
    /// directory, and enforce the inactivity watchdog (§4.E "Download
    /// execution").
    pub async fn handle_download(&self, peer: PeerId, path: &str, transfer: TransferRef) -> Result<(), NodeError> {
        self.transfers.start(path, peer, Direction::Download);
        self.events.emit(Event::DownloadStarted { peer, path: path.to_string() });

        let result = self.run_download(peer, path, transfer).await;

        match &result {
            Ok(()) => self.events.emit(Event::DownloadCompleted { peer, path: path.to_string() }),
            Err(err) => self.events.emit(Event::DownloadFailed { peer, path: path.to_string(), reason: err.to_string() }),
        }
        self.transfers.stop(path, peer, true);
        result
    }

    async fn run_download(&self, peer: PeerId, path: &str, transfer: TransferRef) -> Result<(), NodeError> {
        let blob_store = self.log_store.open_blob_store(transfer.key).await?;
        let mut reader = blob_store.create_read_stream(transfer.id, true, Some(Duration::from_secs(30))).await?;
        let declared_size = reader.declared_size();

        let full_path = meshdrive_files::path::to_absolute(self.local.watch_path(), path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&full_path).await?;

        let mut written: u64 = 0;
        let mut last_milestone: u64 = 0;
        loop {
            let chunk = tokio::time::timeout(self.inactivity_timeout, reader.read_chunk())
                .await
                .map_err(|_| NodeError::InactivityTimeout(self.inactivity_timeout))??;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;

            if declared_size > 0 && self.progress_milestone_pct > 0 {
                let milestone = (written * 100 / declared_size) / self.progress_milestone_pct;
                if milestone > last_milestone {
                    last_milestone = milestone;
                    self.events.emit(Event::DownloadProgress {
                        peer,
                        path: path.to_string(),
                        bytes_done: written,
                        bytes_total: declared_size,
                    });
                }
            }
        }
        file.flush().await?;

        if written != declared_size {
            return Err(NodeError::Incomplete { expected: declared_size, actual: written });
        }
        Ok(())
    }

    /// Tear down a download's transfer-table entry (§4.E
    /// `close_download`).
    pub fn close_download(&self, path: &str, peer: PeerId, force: bool) -> bool {
        self.transfers.stop(path, peer, force)
    }

    /// Full request → download → release cycle against `peer`, used by the
    /// public `download_file_from_peer` API, queued downloads, and archive
    /// mode.
    pub async fn request_and_download(self: &Arc<Self>, peer: PeerId, path: &str) -> Result<(), NodeError> {
        let client = self.client().await?;
        let transfer = client.send_file_request(peer, path).await?;
        let result = self.handle_download(peer, path, transfer).await;
        let _ = client.send_file_release(peer, path).await;
        result
    }

    /// Enable archive mode: a single-flight background loop that downloads
    /// every network file not already local, woken every `relay_interval`
    /// (§4.E "Archive mode").
    pub async fn activate_archive(self: &Arc<Self>) {
        self.archive_enabled.store(true, Ordering::SeqCst);
        self.start_archive_loop_if_needed().await;
    }

    /// Disable archive mode; the running loop observes the flag and stops
    /// rearming itself.
    pub async fn deactivate_archive(&self) {
        self.archive_enabled.store(false, Ordering::SeqCst);
        if let Some(task) = self.archive_task.write().await.take() {
            task.abort();
        }
    }

    /// True if archive mode is currently enabled, for `save_data`
    /// reconstruction.
    pub fn archive_enabled(&self) -> bool {
        self.archive_enabled.load(Ordering::SeqCst)
    }

    async fn start_archive_loop_if_needed(self: &Arc<Self>) {
        let mut task = self.archive_task.write().await;
        if task.is_some() {
            return;
        }
        if self.client.read().await.is_none() {
            return;
        }

        let this = self.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.relay_interval);
            loop {
                ticker.tick().await;
                if !this.archive_enabled.load(Ordering::SeqCst) {
                    break;
                }
                if this.archive_running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                    continue;
                }
                if let Err(err) = this.archive_tick().await {
                    tracing::warn!(error = %err, "archive cycle failed");
                    this.events.emit(Event::Error { message: format!("archive cycle failed: {err}") });
                }
                this.archive_running.store(false, Ordering::SeqCst);
            }
        }));
    }

    async fn archive_tick(self: &Arc<Self>) -> Result<(), NodeError> {
        let candidates = self.list_nonlocal().await?;
        let Some(first) = candidates.into_iter().next() else { return Ok(()) };
        self.request_and_download(first.peer, &first.path).await
    }
}
