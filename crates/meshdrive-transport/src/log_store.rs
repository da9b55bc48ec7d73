//! Append-only authenticated log with a bee-like sorted-map layer, snapshot
//! checkouts, and a diff-between-versions iterator (§6).

use std::sync::Arc;

use async_trait::async_trait;
use meshdrive_files::FileRecord;
use tokio::sync::broadcast;

use crate::blob_store::BlobStore;
use crate::TransportError;

/// One entry of a diff between two log versions, keyed by path. Exactly one
/// of `left`/`right` absent signals an add/remove; both present with
/// differing hashes signals a change (§4.E).
#[derive(Clone, Debug, PartialEq)]
pub struct DiffEntry {
    /// The path this diff entry concerns.
    pub path: String,
    /// The record as of the snapshot version (`None` if the path did not
    /// exist at that version).
    pub left: Option<FileRecord>,
    /// The record as of the current head (`None` if the path has since been
    /// removed).
    pub right: Option<FileRecord>,
}

/// A single peer's append-only log: a sorted map from relative path to
/// [`FileRecord`], plus version/snapshot/diff machinery for replication.
#[async_trait]
pub trait LogHandle: Send + Sync {
    /// The public key identifying this log, usable to re-open it on another
    /// node.
    fn key(&self) -> [u8; 32];

    /// The current append count. Advances by exactly one per successful
    /// `put`/`del`.
    fn version(&self) -> u64;

    /// Block until the log is ready for reads (mirrors the external
    /// primitive's `ready()`).
    async fn ready(&self) -> Result<(), TransportError>;

    /// Pull the latest replicated state from the network before reading.
    async fn update(&self) -> Result<(), TransportError>;

    /// Write (or overwrite) the record for `path`. The sole writer of a log
    /// is the node that owns it.
    async fn put(&self, path: &str, record: FileRecord) -> Result<(), TransportError>;

    /// Write a tombstone for `path`.
    async fn del(&self, path: &str) -> Result<(), TransportError>;

    /// Read the current record for `path`, if any.
    async fn get(&self, path: &str) -> Result<Option<FileRecord>, TransportError>;

    /// Snapshot every path currently present.
    async fn list(&self) -> Result<Vec<FileRecord>, TransportError>;

    /// Diff the log between the snapshot at `since_version` and the current
    /// head. `since_version == 0` diffs against the empty log, i.e. every
    /// present path surfaces as an add.
    async fn diff_since(&self, since_version: u64) -> Result<Vec<DiffEntry>, TransportError>;

    /// Subscribe to append notifications; each send carries the new
    /// version.
    fn subscribe_append(&self) -> broadcast::Receiver<u64>;
}

/// A namespaced store of logs: the local node's own writable log plus
/// handles to any number of peers' logs, opened by public key.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Open a named sub-store (namespace), mirroring the external
    /// primitive's `namespace()`. Used to give each transfer's blob log its
    /// own collision-free namespace (§5).
    fn namespace(&self, name: &str) -> Arc<dyn LogStore>;

    /// This node's own local, writable log. Created lazily on first call.
    async fn local(&self) -> Result<Arc<dyn LogHandle>, TransportError>;

    /// Open a remote peer's log by its public key.
    async fn open(&self, key: [u8; 32]) -> Result<Arc<dyn LogHandle>, TransportError>;

    /// Create (or re-open) a content-addressed blob container published
    /// under this store's namespace, keyed by `name`. Mirrors the external
    /// primitive's corestore-style "one store, many cores" shape: blobs live
    /// over the same store as logs, just under a different sub-namespace
    /// (§6 "Content-addressed blob store: over a log").
    fn blob_store(&self, name: &str) -> Arc<dyn BlobStore>;

    /// Open a peer's blob container for reading, by the public key it was
    /// published under (the `key` half of a `FILE_REQUEST` response).
    async fn open_blob_store(&self, key: [u8; 32]) -> Result<Arc<dyn BlobStore>, TransportError>;
}
