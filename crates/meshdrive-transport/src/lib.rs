//! # meshdrive-transport
//!
//! The "Log store" and "Replication transport" external collaborators named
//! in §6: `LogStore`/`LogHandle` traits for per-peer append-only logs with
//! snapshotting and diff streams, a `BlobStore` trait for content-addressed
//! single-blob containers, and a `RequestChannel` trait for a framed
//! JSON-encoded request/response channel. Each comes with an in-memory
//! reference implementation under [`memory`], used by integration tests and
//! the CLI's loopback mode — the real replication fabric (e.g. a Hypercore
//! network) is a separate, swappable backend behind the same traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod blob_store;
pub mod error;
pub mod log_store;
pub mod memory;
pub mod request_channel;

pub use blob_store::{BlobId, BlobStore};
pub use error::TransportError;
pub use log_store::{DiffEntry, LogHandle, LogStore};
pub use request_channel::{Dispatcher, RequestChannel, Response, ResponseStatus};
