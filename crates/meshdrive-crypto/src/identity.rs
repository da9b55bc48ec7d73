//! Peer identity: an Ed25519 keypair derived deterministically from a
//! per-node seed, and the 32-byte public key that identifies a peer.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoError;

/// A peer's public key (32 bytes). Stringified form is lowercase hex;
/// equality and ordering compare the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Wrap raw public key bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw public key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse a lowercase (or mixed-case) hex string into a peer id.
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidHex(e.to_string()))?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(self.0))
    }
}

impl FromStr for PeerId {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> String {
        id.to_string()
    }
}

impl TryFrom<String> for PeerId {
    type Error = CryptoError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

/// A node's Ed25519 identity keypair, derived deterministically from a
/// 32-byte seed so that `open(save_data)` always reproduces the same
/// [`PeerId`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Keypair {
    #[zeroize(skip)]
    public: [u8; 32],
    seed: [u8; 32],
}

impl Keypair {
    /// Derive a keypair from a 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let public = signing_key.verifying_key().to_bytes();
        Self { public, seed }
    }

    /// Generate a fresh keypair from the OS CSPRNG.
    pub fn generate() -> Result<Self, CryptoError> {
        let seed = crate::random::random_32()?;
        Ok(Self::from_seed(seed))
    }

    /// This keypair's public key, usable as a [`PeerId`].
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        PeerId(self.public)
    }

    /// The seed this keypair was derived from, for persistence in save-data.
    #[must_use]
    pub fn seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// The underlying signing key, for the replication transport's own
    /// authentication handshake.
    #[must_use]
    pub fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.seed)
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair").field("public", &self.peer_id()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_peer_id() {
        let seed = [7u8; 32];
        let a = Keypair::from_seed(seed);
        let b = Keypair::from_seed(seed);
        assert_eq!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn different_seeds_different_peer_ids() {
        let a = Keypair::from_seed([1u8; 32]);
        let b = Keypair::from_seed([2u8; 32]);
        assert_ne!(a.peer_id(), b.peer_id());
    }

    #[test]
    fn peer_id_hex_round_trip() {
        let id = Keypair::from_seed([9u8; 32]).peer_id();
        let text = id.to_string();
        let parsed: PeerId = text.parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(text, text.to_lowercase());
    }

    #[test]
    fn peer_id_from_hex_rejects_wrong_length() {
        assert!(PeerId::from_hex("abcd").is_err());
    }
}
