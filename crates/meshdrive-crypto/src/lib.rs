//! # meshdrive-crypto
//!
//! Peer identity and key generation for meshdrive.
//!
//! This crate covers exactly the "secret-key pair generator" and "32-byte
//! random seed/key" external collaborators named in the design: deriving a
//! peer's Ed25519 identity keypair from a per-node seed, and generating fresh
//! 32-byte seeds and network keys from the OS CSPRNG. Per-connection
//! transport security (handshakes, AEAD, key ratcheting) is the replication
//! transport's concern, out of scope here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod identity;
pub mod random;

pub use error::CryptoError;
pub use identity::{Keypair, PeerId};

/// Byte length of a peer id / network key / seed.
pub const KEY_SIZE: usize = 32;
