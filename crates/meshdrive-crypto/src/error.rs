//! Cryptographic error types.

use thiserror::Error;

/// Errors produced by identity and key generation.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The OS CSPRNG failed to provide randomness.
    #[error("random number generation failed")]
    RandomFailed,

    /// A key or seed was not exactly 32 bytes.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length supplied.
        actual: usize,
    },

    /// A hex string could not be decoded into bytes.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    /// An Ed25519 public key failed point validation.
    #[error("invalid public key")]
    InvalidPublicKey,
}
