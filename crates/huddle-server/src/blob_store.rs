//! Object store for attachment blobs.
//!
//! Blobs are opaque to the server (clients upload ciphertext for encrypted
//! chats). [`FsObjectStore`] keeps each blob under `blobs/<key>` and its
//! content type under `types/<key>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

const BLOB_DIR: &str = "blobs";
const TYPE_DIR: &str = "types";
const MAX_FILENAME_LEN: usize = 128;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `data` under `key`, returning the URL clients fetch it from.
    async fn put(&self, data: Bytes, key: &str, content_type: &str) -> Result<String, ServerError>;

    /// Fetch a blob and its content type.
    async fn get(&self, key: &str) -> Result<(Bytes, String), ServerError>;
}

/// Storage key for an upload: `<unix-millis>-<sanitized filename>`.
pub fn upload_key(filename: &str, unix_millis: i64) -> String {
    format!("{unix_millis}-{}", sanitize_filename(filename))
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`. Runs of dots
/// collapse to one and the result never starts with a dot.
pub fn sanitize_filename(filename: &str) -> String {
    let mut cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILENAME_LEN)
        .collect();
    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let canonical_base = base.canonicalize().unwrap_or_else(|_| base.to_path_buf());
    let mut resolved = canonical_base.clone();
    for component in target
        .strip_prefix(base)
        .unwrap_or(target)
        .components()
    {
        match component {
            std::path::Component::Normal(c) => resolved.push(c),
            std::path::Component::ParentDir => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
            _ => {}
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    base_path: PathBuf,
    max_size: usize,
    public_base_url: String,
}

impl FsObjectStore {
    pub async fn new(
        base_path: PathBuf,
        max_size: usize,
        public_base_url: impl Into<String>,
    ) -> Result<Self, ServerError> {
        for dir in [BLOB_DIR, TYPE_DIR] {
            let path = base_path.join(dir);
            fs::create_dir_all(&path).await.map_err(|e| {
                ServerError::ObjectStorage(format!(
                    "Failed to create blob directory '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }

        info!(path = %base_path.display(), "Object store initialized");

        Ok(Self {
            base_path,
            max_size,
            public_base_url: public_base_url.into(),
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/api/uploads/{}", self.public_base_url, key)
    }

    /// Build a safe path for a file inside one of the store's directories.
    fn safe_subpath(&self, subdir: &str, filename: &str) -> Result<PathBuf, ServerError> {
        if filename.is_empty()
            || filename.contains('/')
            || filename.contains('\\')
            || filename.contains("..")
        {
            return Err(ServerError::BadRequest("Path traversal detected".to_string()));
        }
        let target = self.base_path.join(subdir).join(filename);
        ensure_within(&self.base_path, &target)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, data: Bytes, key: &str, content_type: &str) -> Result<String, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty upload".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::UploadTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let blob_path = self.safe_subpath(BLOB_DIR, key)?;
        let type_path = self.safe_subpath(TYPE_DIR, key)?;

        fs::write(&blob_path, &data)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to write blob {key}: {e}")))?;
        fs::write(&type_path, content_type.as_bytes())
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to write blob {key}: {e}")))?;

        debug!(key = %key, size = data.len(), "Stored blob");
        Ok(self.url_for(key))
    }

    async fn get(&self, key: &str) -> Result<(Bytes, String), ServerError> {
        let blob_path = self.safe_subpath(BLOB_DIR, key)?;
        if !blob_path.exists() {
            return Err(ServerError::NotFound(format!("No upload with key {key}")));
        }

        let data = fs::read(&blob_path)
            .await
            .map_err(|e| ServerError::ObjectStorage(format!("Failed to read blob {key}: {e}")))?;

        let type_path = self.safe_subpath(TYPE_DIR, key)?;
        let content_type = fs::read_to_string(&type_path)
            .await
            .unwrap_or_else(|_| "application/octet-stream".to_string());

        debug!(key = %key, size = data.len(), "Retrieved blob");
        Ok((Bytes::from(data), content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FsObjectStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path().to_path_buf(), 1024, "")
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (store, _dir) = test_store().await;
        let key = upload_key("photo.png", 1_700_000_000_000);

        let url = store
            .put(Bytes::from_static(b"ciphertext"), &key, "image/png")
            .await
            .unwrap();
        assert_eq!(url, "/api/uploads/1700000000000-photo.png");

        let (data, content_type) = store.get(&key).await.unwrap();
        assert_eq!(&data[..], b"ciphertext");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn test_limits() {
        let (store, _dir) = test_store().await;
        assert!(store.put(Bytes::new(), "1-a", "text/plain").await.is_err());
        assert!(matches!(
            store
                .put(Bytes::from(vec![0u8; 2048]), "1-b", "text/plain")
                .await,
            Err(ServerError::UploadTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (store, _dir) = test_store().await;
        assert!(store.get("../types/x").await.is_err());
        assert!(store
            .put(Bytes::from_static(b"x"), "a/../../etc", "text/plain")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_missing_key() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.get("404-nothing.txt").await,
            Err(ServerError::NotFound(_))
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report 2024.pdf"), "report_2024.pdf");
        assert_eq!(sanitize_filename("../../etc/passwd"), "_._etc_passwd");
        assert_eq!(sanitize_filename("a..b"), "a.b");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("日本.txt"), "__.txt");
    }
}
