//! The §7 error taxonomy, as a `thiserror`-derived enum.

use std::borrow::Cow;

use thiserror::Error;

/// Every error kind named in §7. Protocol handlers never let these cross
/// the wire — they convert to an [`crate::events::Event::Error`] locally and
/// an error-status [`meshdrive_transport::Response`] for the caller.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Filesystem or log-store I/O failed.
    #[error("I/O error: {0}")]
    Io(Cow<'static, str>),

    /// The requested file is not indexed locally.
    #[error("file not found: {0}")]
    NotFound(Cow<'static, str>),

    /// A `FILE_REQUEST` response did not match the `{type, key, id}` shape.
    #[error("invalid file reference: {0}")]
    InvalidReference(Cow<'static, str>),

    /// No bytes observed on a download stream for the watchdog period.
    #[error("download stalled: no bytes in {0:?}")]
    InactivityTimeout(std::time::Duration),

    /// The downloaded byte count does not equal the declared blob size.
    #[error("incomplete download: expected {expected} bytes, got {actual}")]
    Incomplete {
        /// Declared blob size.
        expected: u64,
        /// Bytes actually written.
        actual: u64,
    },

    /// `send_message`/`download_file_from_peer` named a peer with no active
    /// request/response channel.
    #[error("no active channel to peer {0}")]
    NoPeer(Cow<'static, str>),

    /// An incoming user message has no registered handler.
    #[error("unknown message type: {0}")]
    UnknownMessageType(Cow<'static, str>),

    /// An inbound response payload was malformed.
    #[error("protocol error: {0}")]
    ProtocolError(Cow<'static, str>),

    /// The operation was aborted by `close()` or a peer disconnect.
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Recoverable failures retry on the next poll/append/archive cycle;
    /// this tells a caller whether that applies.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Io(_) | NodeError::InactivityTimeout(_) | NodeError::Incomplete { .. })
    }

    /// The complement of [`Self::is_transient`].
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<std::io::Error> for NodeError {
    fn from(err: std::io::Error) -> Self {
        NodeError::Io(Cow::Owned(err.to_string()))
    }
}

impl From<meshdrive_transport::TransportError> for NodeError {
    fn from(err: meshdrive_transport::TransportError) -> Self {
        match err {
            meshdrive_transport::TransportError::NotFound(what) => NodeError::NotFound(Cow::Owned(what)),
            meshdrive_transport::TransportError::NoChannel => NodeError::NoPeer(Cow::Borrowed("unknown")),
            meshdrive_transport::TransportError::Protocol(msg) => NodeError::ProtocolError(Cow::Owned(msg)),
            meshdrive_transport::TransportError::Cancelled => NodeError::Cancelled,
            meshdrive_transport::TransportError::Io(msg) => NodeError::Io(Cow::Owned(msg)),
        }
    }
}

impl From<meshdrive_discovery::DiscoveryError> for NodeError {
    fn from(err: meshdrive_discovery::DiscoveryError) -> Self {
        NodeError::Io(Cow::Owned(err.to_string()))
    }
}

impl From<meshdrive_crypto::CryptoError> for NodeError {
    fn from(err: meshdrive_crypto::CryptoError) -> Self {
        NodeError::Io(Cow::Owned(err.to_string()))
    }
}

impl From<meshdrive_files::FilesError> for NodeError {
    fn from(err: meshdrive_files::FilesError) -> Self {
        match err {
            meshdrive_files::FilesError::Io { path, source } => {
                NodeError::Io(Cow::Owned(format!("{path}: {source}")))
            }
            meshdrive_files::FilesError::InvalidPath(p) => NodeError::InvalidReference(Cow::Owned(p)),
        }
    }
}
