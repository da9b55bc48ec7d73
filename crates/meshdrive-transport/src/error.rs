//! Errors for the log store, blob store and request channel collaborators.

use thiserror::Error;

/// Errors surfaced by the replication fabric primitives.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The log, blob, or peer referenced by a key/id was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The log store, blob store, or request channel failed at the I/O
    /// layer (disk, or the underlying network connection).
    #[error("I/O error: {0}")]
    Io(String),

    /// A request was sent to a peer with no active request/response
    /// channel.
    #[error("no active channel to peer")]
    NoChannel,

    /// An inbound response did not match the expected shape.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation was cancelled (node shutdown, peer disconnect).
    #[error("cancelled")]
    Cancelled,
}
