//! SHA-256 content hashing over chunked reads (§4.A).

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::FilesError;

/// Read buffer size for chunked hashing (~64 KiB), bounding memory use for
/// arbitrarily large files.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Hash the full contents of `path`, reading in fixed-size chunks.
///
/// Returns [`FilesError::Io`] if the file disappears or becomes unreadable
/// mid-hash; callers must treat this as transient and retry on a later scan.
pub async fn hash_file(path: &Path) -> Result<[u8; 32], FilesError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|source| FilesError::Io { path: path.display().to_string(), source })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .map_err(|source| FilesError::Io { path: path.display().to_string(), source })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Hex-encode a 32-byte hash, lowercase, matching the wire/log representation.
#[must_use]
pub fn hash_to_hex(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

/// Decode a hex-encoded 32-byte hash back into raw bytes.
pub fn hash_from_hex(s: &str) -> Result<[u8; 32], FilesError> {
    let bytes = hex::decode(s).map_err(|e| FilesError::InvalidPath(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| FilesError::InvalidPath(format!("hash {s} is not 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn hashes_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let mut f = tokio::fs::File::create(&path).await.unwrap();
        f.write_all(b"hello world").await.unwrap();
        f.flush().await.unwrap();
        drop(f);

        let hash = hash_file(&path).await.unwrap();
        let expected = Sha256::digest(b"hello world");
        assert_eq!(hash.as_slice(), expected.as_slice());
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.txt");
        assert!(hash_file(&path).await.is_err());
    }

    #[test]
    fn hex_round_trips() {
        let raw = [0xab_u8; 32];
        let hex_str = hash_to_hex(&raw);
        assert_eq!(hash_from_hex(&hex_str).unwrap(), raw);
    }
}
