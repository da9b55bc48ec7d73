//! Persistent boot configuration (§3 "Save data", §8 round-trip law).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::config::IndexConfig;
use super::error::NodeError;

/// The persistent configuration required to resume a node: identity seed,
/// network key, directories, index options, and the queued-download set.
/// The node must accept any `SaveData` it has previously emitted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaveData {
    /// 32-byte seed the node's Ed25519 identity is derived from.
    #[serde(with = "hex_bytes32")]
    pub seed: [u8; 32],
    /// 32-byte discovery topic secret.
    #[serde(with = "hex_bytes32")]
    pub network_key: [u8; 32],
    /// Watched/synced directory.
    pub watch_path: PathBuf,
    /// Log store backing directory.
    pub corestore_path: PathBuf,
    /// Indexing behavior (archive on/off, poll interval, watch enabled).
    pub index: IndexConfig,
    /// Paths queued for automatic download once any peer advertises them.
    pub queued_downloads: BTreeSet<String>,
}

impl SaveData {
    /// Build fresh save-data for a brand-new node: a random seed and
    /// network key (§3 "Network key... Generated if not supplied"),
    /// default index behavior, and an empty queued-download set.
    pub fn generate(watch_path: PathBuf, corestore_path: PathBuf) -> Result<Self, NodeError> {
        Ok(Self {
            seed: meshdrive_crypto::random::random_32()?,
            network_key: meshdrive_crypto::random::random_32()?,
            watch_path,
            corestore_path,
            index: IndexConfig::default(),
            queued_downloads: BTreeSet::new(),
        })
    }

    /// Load save-data from a JSON file written by [`Self::save_to`].
    pub fn load_from(path: &Path) -> Result<Self, NodeError> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| NodeError::ProtocolError(format!("malformed save-data: {e}").into()))
    }

    /// Persist save-data as JSON, matching the teacher's JSON-config-file
    /// convention.
    pub fn save_to(&self, path: &Path) -> Result<(), NodeError> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| NodeError::ProtocolError(format!("failed to serialize save-data: {e}").into()))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

mod hex_bytes32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes.try_into().map_err(|_| serde::de::Error::custom("expected 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SaveData {
        SaveData {
            seed: [1u8; 32],
            network_key: [2u8; 32],
            watch_path: PathBuf::from("/tmp/watch"),
            corestore_path: PathBuf::from("/tmp/corestore"),
            index: IndexConfig::default(),
            queued_downloads: BTreeSet::from(["a.txt".to_string()]),
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("save_data.json");
        let data = sample();
        data.save_to(&path).unwrap();
        let loaded = SaveData::load_from(&path).unwrap();
        assert_eq!(loaded, data);
    }
}
