//! In-memory reference implementations of [`LogStore`], [`BlobStore`], and
//! [`RequestChannel`]. These back the integration tests and the CLI's
//! loopback mode; a real deployment swaps in a networked backend behind the
//! same traits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use meshdrive_crypto::PeerId;
use meshdrive_files::FileRecord;
use sha2::{Digest, Sha256};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::blob_store::{BlobId, BlobReader, BlobStore, BlobWriter};
use crate::log_store::{DiffEntry, LogHandle, LogStore};
use crate::request_channel::{Dispatcher, RequestChannel, Response};
use crate::TransportError;

/// A shared directory of logs, standing in for the discovery+replication
/// fabric that moves log pages between nodes on a real network. Every
/// [`MemoryLogStore`] sharing a `MemoryNetwork` can `open()` any log
/// registered by another.
#[derive(Default)]
pub struct MemoryNetwork {
    logs: DashMap<[u8; 32], Arc<MemoryLogHandle>>,
    blobs: DashMap<[u8; 32], Arc<MemoryBlobStoreInner>>,
}

impl MemoryNetwork {
    /// Create a fresh, empty network.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, handle: Arc<MemoryLogHandle>) {
        self.logs.insert(handle.key, handle);
    }

    fn blob_store(&self, key: [u8; 32]) -> Arc<MemoryBlobStoreInner> {
        self.blobs
            .entry(key)
            .or_insert_with(|| Arc::new(MemoryBlobStoreInner { key, blobs: DashMap::new(), next_id: AtomicU64::new(0) }))
            .clone()
    }
}

/// One append-only log: a versioned history of sorted-map snapshots, so that
/// `diff_since` can compare any two past versions.
pub struct MemoryLogHandle {
    key: [u8; 32],
    history: RwLock<Vec<BTreeMap<String, FileRecord>>>,
    version: AtomicU64,
    append_tx: broadcast::Sender<u64>,
}

impl MemoryLogHandle {
    fn new(key: [u8; 32]) -> Arc<Self> {
        let (append_tx, _) = broadcast::channel(64);
        Arc::new(Self {
            key,
            history: RwLock::new(vec![BTreeMap::new()]),
            version: AtomicU64::new(0),
            append_tx,
        })
    }

    async fn mutate(&self, path: &str, record: Option<FileRecord>) -> Result<(), TransportError> {
        let mut history = self.history.write().await;
        let mut next = history.last().expect("history always has a base entry").clone();
        match record {
            Some(r) => {
                next.insert(path.to_string(), r);
            }
            None => {
                next.remove(path);
            }
        }
        history.push(next);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.append_tx.send(version);
        Ok(())
    }
}

#[async_trait]
impl LogHandle for MemoryLogHandle {
    fn key(&self) -> [u8; 32] {
        self.key
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    async fn ready(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn update(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn put(&self, path: &str, record: FileRecord) -> Result<(), TransportError> {
        self.mutate(path, Some(record)).await
    }

    async fn del(&self, path: &str) -> Result<(), TransportError> {
        self.mutate(path, None).await
    }

    async fn get(&self, path: &str) -> Result<Option<FileRecord>, TransportError> {
        let history = self.history.read().await;
        Ok(history.last().expect("non-empty history").get(path).cloned())
    }

    async fn list(&self) -> Result<Vec<FileRecord>, TransportError> {
        let history = self.history.read().await;
        Ok(history.last().expect("non-empty history").values().cloned().collect())
    }

    async fn diff_since(&self, since_version: u64) -> Result<Vec<DiffEntry>, TransportError> {
        let history = self.history.read().await;
        let head_version = (history.len() - 1) as u64;
        let since_version = since_version.min(head_version);
        let left = &history[since_version as usize];
        let right = &history[head_version as usize];

        let mut paths: std::collections::BTreeSet<&String> = left.keys().collect();
        paths.extend(right.keys());

        Ok(paths
            .into_iter()
            .filter_map(|path| {
                let left_value = left.get(path).cloned();
                let right_value = right.get(path).cloned();
                if left_value == right_value {
                    return None;
                }
                Some(DiffEntry { path: path.clone(), left: left_value, right: right_value })
            })
            .collect())
    }

    fn subscribe_append(&self) -> broadcast::Receiver<u64> {
        self.append_tx.subscribe()
    }
}

/// In-memory [`LogStore`] backed by a shared [`MemoryNetwork`].
pub struct MemoryLogStore {
    network: Arc<MemoryNetwork>,
    local_key: [u8; 32],
    local: Mutex<Option<Arc<MemoryLogHandle>>>,
}

impl MemoryLogStore {
    /// Create a store whose own local log will be published under
    /// `local_key` (typically the node's peer id).
    #[must_use]
    pub fn new(network: Arc<MemoryNetwork>, local_key: [u8; 32]) -> Arc<Self> {
        Arc::new(Self { network, local_key, local: Mutex::new(None) })
    }

    fn namespaced_key(&self, name: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.local_key);
        hasher.update(b"/");
        hasher.update(name.as_bytes());
        hasher.finalize().into()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    fn namespace(&self, name: &str) -> Arc<dyn LogStore> {
        Arc::new(Self {
            network: self.network.clone(),
            local_key: self.namespaced_key(name),
            local: Mutex::new(None),
        })
    }

    async fn local(&self) -> Result<Arc<dyn LogHandle>, TransportError> {
        let mut local = self.local.lock().await;
        if let Some(handle) = local.as_ref() {
            return Ok(handle.clone());
        }
        let handle = MemoryLogHandle::new(self.local_key);
        self.network.register(handle.clone());
        *local = Some(handle.clone());
        Ok(handle)
    }

    async fn open(&self, key: [u8; 32]) -> Result<Arc<dyn LogHandle>, TransportError> {
        self.network
            .logs
            .get(&key)
            .map(|entry| entry.value().clone() as Arc<dyn LogHandle>)
            .ok_or_else(|| TransportError::NotFound(hex::encode(key)))
    }

    fn blob_store(&self, name: &str) -> Arc<dyn BlobStore> {
        let key = self.namespaced_key(name);
        Arc::new(MemoryBlobStore(self.network.blob_store(key)))
    }

    async fn open_blob_store(&self, key: [u8; 32]) -> Result<Arc<dyn BlobStore>, TransportError> {
        self.network
            .blobs
            .get(&key)
            .map(|entry| Arc::new(MemoryBlobStore(entry.value().clone())) as Arc<dyn BlobStore>)
            .ok_or_else(|| TransportError::NotFound(hex::encode(key)))
    }
}

struct MemoryBlobWriter {
    store: Arc<MemoryBlobStoreInner>,
    buf: Vec<u8>,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<(BlobId, u64), TransportError> {
        let id = BlobId(self.store.next_id.fetch_add(1, Ordering::SeqCst));
        let size = self.buf.len() as u64;
        self.store.blobs.insert(id, self.buf);
        Ok((id, size))
    }
}

struct MemoryBlobReader {
    data: Vec<u8>,
    offset: usize,
}

#[async_trait]
impl BlobReader for MemoryBlobReader {
    fn declared_size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        const CHUNK: usize = 64 * 1024;
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + CHUNK).min(self.data.len());
        let chunk = self.data[self.offset..end].to_vec();
        self.offset = end;
        Ok(Some(chunk))
    }
}

struct MemoryBlobStoreInner {
    key: [u8; 32],
    blobs: DashMap<BlobId, Vec<u8>>,
    next_id: AtomicU64,
}

/// In-memory content-addressed single-blob container, created fresh per
/// transfer.
pub struct MemoryBlobStore(Arc<MemoryBlobStoreInner>);

impl MemoryBlobStore {
    /// Create a new, empty blob store published under `key`.
    #[must_use]
    pub fn new(key: [u8; 32]) -> Self {
        Self(Arc::new(MemoryBlobStoreInner { key, blobs: DashMap::new(), next_id: AtomicU64::new(0) }))
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn key(&self) -> [u8; 32] {
        self.0.key
    }

    async fn create_write_stream(&self) -> Result<Box<dyn BlobWriter>, TransportError> {
        Ok(Box::new(MemoryBlobWriter { store: self.0.clone(), buf: Vec::new() }))
    }

    async fn create_read_stream(
        &self,
        id: BlobId,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn BlobReader>, TransportError> {
        let _ = (wait, timeout);
        let data = self
            .0
            .blobs
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::NotFound(format!("blob {}", id.0)))?;
        Ok(Box::new(MemoryBlobReader { data, offset: 0 }))
    }

    async fn clear(&self, id: BlobId) -> Result<(), TransportError> {
        self.0.blobs.remove(&id);
        Ok(())
    }
}

/// In-memory [`RequestChannel`] that calls straight into the far peer's
/// [`Dispatcher`] without serializing over a real socket. Matches the
/// external primitive's contract (JSON value encoding) in spirit: payloads
/// still round-trip through `serde_json::Value`.
pub struct LocalRequestChannel {
    local_peer: PeerId,
    remote: Arc<dyn Dispatcher>,
}

impl LocalRequestChannel {
    /// Wire this channel directly to `remote`'s dispatcher, identifying
    /// every request as coming from `local_peer`.
    #[must_use]
    pub fn new(local_peer: PeerId, remote: Arc<dyn Dispatcher>) -> Self {
        Self { local_peer, remote }
    }
}

#[async_trait]
impl RequestChannel for LocalRequestChannel {
    async fn request(&self, method: &str, payload: serde_json::Value) -> Result<Response, TransportError> {
        Ok(self.remote.dispatch(self.local_peer, method, payload).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, hash: u8) -> FileRecord {
        FileRecord::new(path, 10, 1.0, [hash; 32])
    }

    #[tokio::test]
    async fn diff_since_zero_reports_every_path_as_added() {
        let network = MemoryNetwork::new();
        let store = MemoryLogStore::new(network, [1u8; 32]);
        let local = store.local().await.unwrap();
        local.put("a.txt", record("a.txt", 1)).await.unwrap();
        local.put("b.txt", record("b.txt", 2)).await.unwrap();

        let diff = local.diff_since(0).await.unwrap();
        assert_eq!(diff.len(), 2);
        assert!(diff.iter().all(|d| d.left.is_none() && d.right.is_some()));
    }

    #[tokio::test]
    async fn diff_since_detects_change_and_removal() {
        let network = MemoryNetwork::new();
        let store = MemoryLogStore::new(network, [2u8; 32]);
        let local = store.local().await.unwrap();
        local.put("a.txt", record("a.txt", 1)).await.unwrap();
        local.put("b.txt", record("b.txt", 2)).await.unwrap();
        let baseline = local.version();

        local.put("a.txt", record("a.txt", 9)).await.unwrap();
        local.del("b.txt").await.unwrap();

        let diff = local.diff_since(baseline).await.unwrap();
        assert_eq!(diff.len(), 2);
        let a = diff.iter().find(|d| d.path == "a.txt").unwrap();
        assert!(a.left.is_some() && a.right.is_some());
        let b = diff.iter().find(|d| d.path == "b.txt").unwrap();
        assert!(b.left.is_some() && b.right.is_none());
    }

    #[tokio::test]
    async fn open_finds_peer_log_on_shared_network() {
        let network = MemoryNetwork::new();
        let a_store = MemoryLogStore::new(network.clone(), [3u8; 32]);
        let a_local = a_store.local().await.unwrap();
        a_local.put("x.txt", record("x.txt", 5)).await.unwrap();

        let b_store = MemoryLogStore::new(network, [4u8; 32]);
        let opened = b_store.open([3u8; 32]).await.unwrap();
        assert_eq!(opened.get("x.txt").await.unwrap().unwrap().hash, a_local.get("x.txt").await.unwrap().unwrap().hash);
    }

    #[tokio::test]
    async fn blob_round_trip() {
        let store = MemoryBlobStore::new([5u8; 32]);
        let mut writer = store.create_write_stream().await.unwrap();
        writer.write(b"hello ").await.unwrap();
        writer.write(b"world").await.unwrap();
        let (id, size) = writer.finish().await.unwrap();
        assert_eq!(size, 11);

        let mut reader = store.create_read_stream(id, false, None).await.unwrap();
        assert_eq!(reader.declared_size(), 11);
        let mut out = Vec::new();
        while let Some(chunk) = reader.read_chunk().await.unwrap() {
            out.extend(chunk);
        }
        assert_eq!(out, b"hello world");
    }
}
