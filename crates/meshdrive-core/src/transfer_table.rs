//! The transfer table (§3 "Transfer table", §5 "Shared-resource policy"): a
//! two-level `path -> peer -> {direction, started_at}` map whose top-level
//! key presence is the busy-file flag the local file index consults before
//! touching a path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use meshdrive_crypto::PeerId;

/// Which side of a transfer this node is playing for a given path/peer pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// This node is streaming a local file out to `peer`.
    Upload,
    /// This node is streaming a file in from `peer`.
    Download,
}

/// One active transfer endpoint.
#[derive(Clone, Debug)]
pub struct TransferEntry {
    /// Which side of the transfer this node is playing.
    pub direction: Direction,
    /// The peer at the other end.
    pub peer: PeerId,
    /// When the entry was created.
    pub started_at: Instant,
}

/// The `path -> peer -> entry` table (§3). A path's top-level key presence
/// is the "busy" flag the local file index checks before mutating its index
/// entry (§4.D "Busy-file rule"). Writer-serialized by construction: every
/// mutation goes through the index manager's dispatch path (§5).
#[derive(Default)]
pub struct TransferTable {
    paths: DashMap<String, DashMap<PeerId, TransferEntry>>,
    active_count: AtomicUsize,
}

impl TransferTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// True if `path` is the endpoint of any in-flight transfer, in either
    /// direction, with any peer. `is_busy` reads may be stale by one event
    /// (§5); callers must re-check on the next tick rather than assume
    /// freshness.
    #[must_use]
    pub fn is_busy(&self, path: &str) -> bool {
        self.paths.get(path).map(|peers| !peers.is_empty()).unwrap_or(false)
    }

    /// Mark `path` as busy with `peer` in `direction`. Idempotent: replaces
    /// any existing entry for the same `(path, peer)` pair.
    pub fn start(&self, path: &str, peer: PeerId, direction: Direction) {
        let peers = self.paths.entry(path.to_string()).or_default();
        if peers.insert(peer, TransferEntry { direction, peer, started_at: Instant::now() }).is_none() {
            self.active_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Remove the `(path, peer)` entry. `force` bypasses the refusal rule:
    /// without it, the removal is refused (returning `false`, entry left in
    /// place) unless this is the last active entry for `path` (§4.E
    /// "close_upload/close_download ... must refuse unless no active
    /// transfers remain unless force"). Returns `true` if the entry was
    /// removed.
    pub fn stop(&self, path: &str, peer: PeerId, force: bool) -> bool {
        let Some(peers) = self.paths.get(path) else { return true };
        if !force && peers.len() > 1 {
            return false;
        }
        drop(peers);

        let removed = self
            .paths
            .get_mut(path)
            .map(|mut peers| peers.remove(&peer).is_some())
            .unwrap_or(false);
        if removed {
            self.active_count.fetch_sub(1, Ordering::SeqCst);
        }
        if self.paths.get(path).map(|peers| peers.is_empty()).unwrap_or(false) {
            self.paths.remove(path);
        }
        removed
    }

    /// Every path currently busy, with its active entries. Used by `close()`
    /// to cancel in-flight transfers.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Vec<TransferEntry>)> {
        self.paths
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().iter().map(|e| e.value().clone()).collect()))
            .collect()
    }

    /// True iff no transfer-table entries remain at all (§8 invariant 4: the
    /// transfer table is empty iff no streams are open against the
    /// content-addressed store).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active_count.load(Ordering::SeqCst) == 0
    }

    /// Unconditionally clear every entry, for `close()`'s best-effort
    /// teardown (§5 "close() cancels in-flight transfers with CANCELLED").
    pub fn clear(&self) {
        self.paths.clear();
        self.active_count.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(b: u8) -> PeerId {
        PeerId::from_bytes([b; 32])
    }

    #[test]
    fn busy_iff_entry_present() {
        let table = TransferTable::new();
        assert!(!table.is_busy("a.txt"));
        table.start("a.txt", peer(1), Direction::Upload);
        assert!(table.is_busy("a.txt"));
        assert!(table.stop("a.txt", peer(1), false));
        assert!(!table.is_busy("a.txt"));
    }

    #[test]
    fn stop_without_force_refuses_while_other_entries_remain() {
        let table = TransferTable::new();
        table.start("a.txt", peer(1), Direction::Upload);
        table.start("a.txt", peer(2), Direction::Upload);

        assert!(!table.stop("a.txt", peer(1), false));
        assert!(table.is_busy("a.txt"));

        assert!(table.stop("a.txt", peer(1), true));
        assert!(table.is_busy("a.txt"));

        assert!(table.stop("a.txt", peer(2), false));
        assert!(!table.is_busy("a.txt"));
    }

    #[test]
    fn clear_empties_the_table() {
        let table = TransferTable::new();
        table.start("a.txt", peer(1), Direction::Download);
        table.start("b.txt", peer(2), Direction::Upload);
        assert!(!table.is_empty());
        table.clear();
        assert!(table.is_empty());
        assert!(!table.is_busy("a.txt"));
    }
}
