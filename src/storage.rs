//! Object storage interface consumed by this crate (§6). Out of scope per
//! §1 ("object storage (S3/MinIO) — only a put/get/presign interface is
//! consumed"); no S3 SDK dependency is added. `LocalFsStore` is a dev/test
//! stand-in satisfying the same trait.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("upload failed: {0}")]
    UploadFailed(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), StorageError>;

    async fn download_stream(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError>;

    async fn presign_get(&self, bucket: &str, key: &str, ttl_s: u64) -> Result<String, StorageError>;

    async fn set_tags(
        &self,
        bucket: &str,
        key: &str,
        tags: HashMap<String, String>,
    ) -> Result<(), StorageError>;
}

/// Local-filesystem-backed store rooted at `root_dir`; buckets are subdirectories.
pub struct LocalFsStore {
    root_dir: PathBuf,
}

impl LocalFsStore {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    fn path_for(&self, bucket: &str, key: &str) -> PathBuf {
        self.root_dir.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for LocalFsStore {
    async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<(), StorageError> {
        let path = self.path_for(bucket, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        }
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        tokio::io::copy(reader, &mut file)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    async fn download_stream(
        &self,
        bucket: &str,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError> {
        let path = self.path_for(bucket, key);
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        tokio::io::copy(&mut file, writer)
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl_s: u64) -> Result<String, StorageError> {
        Ok(format!("file://{}/{}/{}?ttl={}", self.root_dir.display(), bucket, key, ttl_s))
    }

    async fn set_tags(
        &self,
        _bucket: &str,
        _key: &str,
        _tags: HashMap<String, String>,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_upload_download() {
        let dir = std::env::temp_dir().join(format!("mgf-store-test-{}", uuid::Uuid::new_v4()));
        let store = LocalFsStore::new(&dir);
        let mut data: &[u8] = b"hello world";
        store.upload_stream("bucket", "k", &mut data).await.unwrap();
        let mut out = Vec::new();
        store.download_stream("bucket", "k", &mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
