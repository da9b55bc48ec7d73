//! Errors for hashing and path handling.

use thiserror::Error;

/// Errors produced while hashing files or normalizing paths.
#[derive(Debug, Error)]
pub enum FilesError {
    /// The file disappeared or became unreadable mid-hash. Callers should
    /// treat this as transient and retry on the next scan.
    #[error("I/O error hashing {path}: {source}")]
    Io {
        /// The path being hashed when the error occurred.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A path escaped the watch-root (e.g. via `..` components) or was not
    /// valid UTF-8.
    #[error("invalid relative path: {0}")]
    InvalidPath(String),
}
