//! Content-addressed, single-blob containers (§3 "Transfer object", §6).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::TransportError;

/// An opaque locator for a single blob within a [`BlobStore`]. Wire-encodable
/// as part of the `FILE_REQUEST` response payload `{type, key, id}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobId(pub u64);

/// A write handle for one blob. Dropped (without `finish`) on cancellation.
#[async_trait]
pub trait BlobWriter: Send + Sync {
    /// Append a chunk of bytes to the blob being written.
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Finalize the blob and return its locator plus declared size.
    async fn finish(self: Box<Self>) -> Result<(BlobId, u64), TransportError>;
}

/// A read handle for one blob.
#[async_trait]
pub trait BlobReader: Send + Sync {
    /// The blob's declared total size, known before any bytes are read.
    fn declared_size(&self) -> u64;

    /// Read the next chunk, or `None` at end of stream.
    async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError>;
}

/// A single-purpose content-addressed container for one file's bytes,
/// created within a per-transfer namespace (§4.E, §5) and torn down after
/// release.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// The public key this container is published under — the `key` half
    /// of the `{key, id}` transfer object.
    fn key(&self) -> [u8; 32];

    /// Open a write stream for a new blob.
    async fn create_write_stream(&self) -> Result<Box<dyn BlobWriter>, TransportError>;

    /// Open a read stream for `id`. If `wait` is true and the blob is not
    /// yet locally available (e.g. still replicating), block until it is or
    /// `timeout` elapses.
    async fn create_read_stream(
        &self,
        id: BlobId,
        wait: bool,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn BlobReader>, TransportError>;

    /// Release the container's storage for `id`.
    async fn clear(&self, id: BlobId) -> Result<(), TransportError>;
}
