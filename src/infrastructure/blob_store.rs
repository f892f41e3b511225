// Media blob storage: filesystem-backed and in-memory implementations.
// Blobs are addressed by `blob://<key>` URLs; etags are base64 SHA-256 digests.

use async_trait::async_trait;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{AppError, AppResult, StoreKind};
use crate::infrastructure::fail_points::FailPoints;
use crate::infrastructure::traits::{BlobStore, StoredBlob};

const URL_SCHEME: &str = "blob://";

pub fn blob_url(key: &str) -> String {
    format!("{}{}", URL_SCHEME, key)
}

pub fn etag_for(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(Sha256::digest(bytes))
}

fn key_from_url(url: &str) -> AppResult<&str> {
    url.strip_prefix(URL_SCHEME).ok_or_else(|| {
        AppError::dependency(StoreKind::Blob, format!("unrecognised blob url {}", url))
    })
}

/// Keys are relative paths; anything that could escape the root is rejected.
fn validate_key(key: &str) -> AppResult<()> {
    let path = Path::new(key);
    let safe = !key.is_empty()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
    if safe {
        Ok(())
    } else {
        Err(AppError::dependency(
            StoreKind::Blob,
            format!("invalid blob key {}", key),
        ))
    }
}

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub async fn new(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            AppError::dependency(
                StoreKind::Blob,
                format!("Failed to create blob root {}: {}", root.display(), e),
            )
        })?;
        info!("Filesystem blob store rooted at {}", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> AppResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn io_error(action: &str, key: &str, err: std::io::Error) -> AppError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => {
            AppError::unavailable(StoreKind::Blob, format!("{} {}: {}", action, key, err))
        }
        _ => AppError::dependency(StoreKind::Blob, format!("{} {}: {}", action, key, err)),
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> AppResult<StoredBlob> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("Failed to prepare", key, e))?;
        }
        let etag = etag_for(&bytes);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| io_error("Failed to write", key, e))?;
        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(StoredBlob {
            url: blob_url(key),
            etag,
        })
    }

    async fn remove(&self, url: &str) -> AppResult<()> {
        let key = key_from_url(url)?;
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("Failed to remove", key, e)),
        }
    }

    async fn exists(&self, url: &str) -> AppResult<bool> {
        let key = key_from_url(url)?;
        let path = self.path_for(key)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error("Failed to stat", key, e))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_points: FailPoints,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fail_points(fail_points: FailPoints) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            fail_points,
        }
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> AppResult<StoredBlob> {
        self.fail_points.check("blob.upload", StoreKind::Blob)?;
        validate_key(key)?;
        let etag = etag_for(&bytes);
        self.blobs.write().await.insert(key.to_string(), bytes);
        Ok(StoredBlob {
            url: blob_url(key),
            etag,
        })
    }

    async fn remove(&self, url: &str) -> AppResult<()> {
        self.fail_points.check("blob.remove", StoreKind::Blob)?;
        let key = key_from_url(url)?;
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, url: &str) -> AppResult<bool> {
        let key = key_from_url(url)?;
        Ok(self.blobs.read().await.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_upload_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).await.unwrap();

        let stored = store
            .upload(b"image-bytes".to_vec(), "media/1/cat.png")
            .await
            .unwrap();
        assert_eq!(stored.url, "blob://media/1/cat.png");
        assert_eq!(stored.etag, etag_for(b"image-bytes"));
        assert!(store.exists(&stored.url).await.unwrap());

        store.remove(&stored.url).await.unwrap();
        assert!(!store.exists(&stored.url).await.unwrap());
        store.remove(&stored.url).await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).await.unwrap();
        assert!(store.upload(vec![1], "../outside").await.is_err());
        assert!(store.upload(vec![1], "/etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_in_memory_store_honours_fail_points() {
        let fail_points = FailPoints::new();
        let store = InMemoryBlobStore::with_fail_points(fail_points.clone());
        fail_points.fail("blob.upload");
        assert!(store.upload(vec![1, 2], "a/b").await.is_err());
        assert!(store.is_empty().await);

        fail_points.clear("blob.upload");
        let stored = store.upload(vec![1, 2], "a/b").await.unwrap();
        assert!(store.exists(&stored.url).await.unwrap());
    }
}
