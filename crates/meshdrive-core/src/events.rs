//! The typed event bus (component G, §6).

use meshdrive_crypto::PeerId;
use tokio::sync::broadcast;

/// Every event the node's public event bus can emit. Names mirror the §6
/// identifiers exactly.
#[derive(Clone, Debug)]
pub enum Event {
    /// A download's byte count crossed a progress milestone.
    DownloadProgress {
        /// The peer the download is from.
        peer: PeerId,
        /// The path being downloaded.
        path: String,
        /// Bytes written so far.
        bytes_done: u64,
        /// Declared total size.
        bytes_total: u64,
    },
    /// Save-data changed; carries the new value serialized as JSON so
    /// embedders don't need to depend on the concrete type to observe it.
    SaveDataUpdate {
        /// The new save-data, JSON-encoded.
        save_data: serde_json::Value,
    },
    /// A recoverable failure was logged and the owning loop continued.
    Error {
        /// Human-readable description.
        message: String,
    },
    /// A swarm connection to `peer` came up and its local-index log was
    /// registered with the index manager.
    PeerConnected {
        /// The peer that connected.
        peer: PeerId,
    },
    /// A previously connected peer's connection closed.
    PeerDisconnected {
        /// The peer that disconnected.
        peer: PeerId,
    },
    /// The local file index gained a path that was not previously cached.
    LocalFileAdded {
        /// Relative path.
        path: String,
        /// Lowercase hex SHA-256.
        hash: String,
    },
    /// A cached local path disappeared.
    LocalFileRemoved {
        /// Relative path.
        path: String,
    },
    /// A cached local path's hash changed (size/mtime-only changes do not
    /// fire this).
    LocalFileChanged {
        /// Relative path.
        path: String,
        /// Hash before the change.
        prev_hash: String,
        /// Hash after the change.
        hash: String,
    },
    /// A peer's log diff surfaced a path present in the snapshot but absent
    /// before (or present for the first time after a reconnect reset).
    PeerFileAdded {
        /// The path.
        path: String,
        /// The peer whose log produced this diff.
        peer: PeerId,
        /// The path's hash at the new version.
        hash: String,
    },
    /// A peer's log diff surfaced a path removed since the last observed
    /// version.
    PeerFileRemoved {
        /// The path.
        path: String,
        /// The peer whose log produced this diff.
        peer: PeerId,
    },
    /// A peer's log diff surfaced a path whose hash changed.
    PeerFileChanged {
        /// The path.
        path: String,
        /// The peer whose log produced this diff.
        peer: PeerId,
        /// Hash before the change.
        prev_hash: String,
        /// Hash after the change.
        hash: String,
    },
    /// A download's transfer-table entry was created.
    DownloadStarted {
        /// The peer the download is from.
        peer: PeerId,
        /// The path being downloaded.
        path: String,
    },
    /// A download terminated without completing.
    DownloadFailed {
        /// The peer the download was from.
        peer: PeerId,
        /// The path that failed to download.
        path: String,
        /// What went wrong.
        reason: String,
    },
    /// A download finished successfully and the local index will observe
    /// it on the next scan.
    DownloadCompleted {
        /// The peer the download was from.
        peer: PeerId,
        /// The path that was downloaded.
        path: String,
    },
}

/// Synchronous-delivery, FIFO-per-listener pub/sub for [`Event`]. Backed by
/// a `tokio::sync::broadcast` channel: every subscriber sees every event
/// emitted after it subscribed, in emission order.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus with the given channel capacity (oldest events are
    /// dropped for slow subscribers once exceeded).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit an event to every current subscriber. A send with no
    /// subscribers is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
