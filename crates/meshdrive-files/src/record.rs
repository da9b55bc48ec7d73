//! The [`FileRecord`] unit stored in every peer's log (§3).

use serde::{Deserialize, Serialize};

/// A single file's metadata as stored in a peer's log, keyed by `path`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Relative path, forward-slash normalized, no leading slash. Duplicated
    /// from the log key for convenience.
    pub path: String,
    /// Byte count.
    pub size: u64,
    /// Monotonic timestamp in milliseconds since the Unix epoch. Used only
    /// for local change detection, never for cross-peer ordering.
    pub modified: f64,
    /// Lowercase hex-encoded SHA-256 of the full file contents.
    pub hash: String,
}

impl FileRecord {
    /// Build a record for `path` from its scanned metadata and hash.
    #[must_use]
    pub fn new(path: impl Into<String>, size: u64, modified: f64, hash: [u8; 32]) -> Self {
        Self { path: path.into(), size, modified, hash: crate::hash::hash_to_hex(&hash) }
    }

    /// The quick-change key: if both fields match a cached record, the file
    /// is assumed unchanged and its hash is not recomputed (§3).
    #[must_use]
    pub fn quick_change_key(&self) -> (u64, u64) {
        (self.size, self.modified.to_bits())
    }

    /// True if `self` and `other` have the same quick-change key, i.e. a
    /// rescan can skip rehashing.
    #[must_use]
    pub fn unchanged_by_quick_key(&self, other: &FileRecord) -> bool {
        self.quick_change_key() == other.quick_change_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quick_change_key_matches_for_identical_metadata() {
        let a = FileRecord::new("a.txt", 10, 123.0, [1u8; 32]);
        let b = FileRecord::new("a.txt", 10, 123.0, [2u8; 32]);
        assert!(a.unchanged_by_quick_key(&b));
    }

    #[test]
    fn quick_change_key_differs_when_size_changes() {
        let a = FileRecord::new("a.txt", 10, 123.0, [1u8; 32]);
        let b = FileRecord::new("a.txt", 11, 123.0, [1u8; 32]);
        assert!(!a.unchanged_by_quick_key(&b));
    }
}
