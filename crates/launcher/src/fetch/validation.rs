//! Archive integrity verification between fetch and install

use crate::error::{LauncherError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

const BUFFER_SIZE: usize = 64 * 1024;

/// Render an xxHash64 digest as little-endian base64
pub fn xxhash64_to_base64(hash: u64) -> String {
    let bytes = hash.to_le_bytes();
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

/// Expected properties of a downloaded archive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveValidation {
    /// Expected xxHash64 in base64 format
    pub xxhash64_base64: Option<String>,
    /// Expected archive size in bytes
    pub expected_size: Option<u64>,
}

impl ArchiveValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xxhash64_base64<S: Into<String>>(mut self, hash: S) -> Self {
        self.xxhash64_base64 = Some(hash.into());
        self
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    /// Check if validation is needed
    pub fn is_empty(&self) -> bool {
        self.xxhash64_base64.is_none() && self.expected_size.is_none()
    }

    /// Verify the archive at `path`, size first, then a streaming hash.
    ///
    /// Mismatches are reported as `InvalidArchive`.
    pub async fn verify(&self, path: &Path) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let unreadable = |e: std::io::Error| LauncherError::InvalidArchive {
            archive: path.to_path_buf(),
            reason: format!("cannot read archive for verification: {}", e),
        };

        let file_size = fs::metadata(path).await.map_err(unreadable)?.len();
        if let Some(expected) = self.expected_size {
            if file_size != expected {
                return Err(LauncherError::InvalidArchive {
                    archive: path.to_path_buf(),
                    reason: format!("size mismatch: expected {} bytes, got {} bytes", expected, file_size),
                });
            }
        }

        let Some(ref expected_hash) = self.xxhash64_base64 else {
            return Ok(());
        };

        let mut file = fs::File::open(path).await.map_err(unreadable)?;
        let mut hasher = Xxh64::new(0);
        let mut buffer = vec![0u8; BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await.map_err(unreadable)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        let actual_hash = xxhash64_to_base64(hasher.digest());
        debug!(
            "XXHash64 archive verification: expected={}, actual={}",
            expected_hash, actual_hash
        );
        if &actual_hash != expected_hash {
            return Err(LauncherError::InvalidArchive {
                archive: path.to_path_buf(),
                reason: format!("xxHash64 mismatch: expected {}, got {}", expected_hash, actual_hash),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    fn xxhash64_base64_of(data: &[u8]) -> String {
        xxhash64_to_base64(xxhash_rust::xxh64::xxh64(data, 0))
    }

    #[tokio::test]
    async fn empty_validation_always_passes() {
        let validation = ArchiveValidation::new();
        assert!(validation.is_empty());
        assert!(validation.verify(Path::new("does-not-exist.zip")).await.is_ok());
    }

    #[tokio::test]
    async fn matching_hash_and_size_pass() {
        let data = b"PK\x03\x04 pretend archive";
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.zip");
        tokio::fs::write(&path, data).await.unwrap();

        let validation = ArchiveValidation::new()
            .with_xxhash64_base64(xxhash64_base64_of(data))
            .with_expected_size(data.len() as u64);

        assert!(validation.verify(&path).await.is_ok());
    }

    #[tokio::test]
    async fn hash_mismatch_is_invalid_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.zip");
        tokio::fs::write(&path, b"tampered").await.unwrap();

        let validation = ArchiveValidation::new().with_xxhash64_base64("AAAAAAAAAA8=");
        let err = validation.verify(&path).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArchive);
    }

    #[tokio::test]
    async fn size_mismatch_is_invalid_archive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("game.zip");
        tokio::fs::write(&path, b"short").await.unwrap();

        let validation = ArchiveValidation::new().with_expected_size(999);
        match validation.verify(&path).await.unwrap_err() {
            LauncherError::InvalidArchive { reason, .. } => assert!(reason.contains("size mismatch")),
            other => panic!("Expected InvalidArchive, got {:?}", other),
        }
    }
}
