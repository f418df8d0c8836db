use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use parlor_shared::constants::DOWNLOAD_PATH_PREFIX;

use crate::error::ServerError;

const META_SUFFIX: &str = ".meta.json";

/// Verify that a resolved path stays within the expected base directory.
/// Prevents path traversal attacks.
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
            _ => {} // RootDir, CurDir, Prefix: skip
        }
    }
    if !resolved.starts_with(&canonical_base) {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// What was declared for an upload, kept next to the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    pub original_name: String,
    pub content_type: String,
}

/// A file that has been written to the store.
#[derive(Debug, Clone)]
pub struct StoredFile {
    /// Name under which the bytes were written
    pub name: String,
    /// Stable reference to place in a message's `content`
    pub reference: String,
    pub size: u64,
}

/// Upload storage. Bytes never pass through the router; messages only
/// carry the returned reference.
#[derive(Debug, Clone)]
pub struct FileStore {
    base_path: PathBuf,
    max_size: usize,
}

impl FileStore {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::FileStorage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;

        info!(path = %base_path.display(), "File store initialized");

        Ok(Self {
            base_path,
            max_size,
        })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Write an upload under a fresh unique name that keeps the original
    /// extension.
    pub async fn store(
        &self,
        original_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<StoredFile, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::FileTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let name = match extension_of(original_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };
        let path = self.safe_path(&name)?;

        fs::write(&path, data)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to write {}: {}", name, e)))?;

        let meta = FileMeta {
            original_name: original_name.to_string(),
            content_type: content_type.to_string(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| ServerError::FileStorage(format!("Failed to encode metadata: {e}")))?;
        fs::write(self.safe_path(&format!("{name}{META_SUFFIX}"))?, meta_json)
            .await
            .map_err(|e| {
                ServerError::FileStorage(format!("Failed to write metadata for {}: {}", name, e))
            })?;

        debug!(name = %name, size = data.len(), content_type, "Stored upload");

        Ok(StoredFile {
            reference: format!("{DOWNLOAD_PATH_PREFIX}{name}"),
            size: data.len() as u64,
            name,
        })
    }

    /// Read a stored file and its declared metadata.
    pub async fn load(&self, name: &str) -> Result<(Vec<u8>, FileMeta), ServerError> {
        validate_name(name)?;
        let path = self.safe_path(name)?;

        if !path.exists() {
            return Err(ServerError::FileNotFound(name.to_string()));
        }

        let data = fs::read(&path)
            .await
            .map_err(|e| ServerError::FileStorage(format!("Failed to read {}: {}", name, e)))?;

        let meta = match fs::read(self.safe_path(&format!("{name}{META_SUFFIX}"))?).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|_| fallback_meta(name)),
            Err(_) => fallback_meta(name),
        };

        debug!(name = %name, size = data.len(), "Loaded upload");
        Ok((data, meta))
    }

    fn safe_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        let raw = self.base_path.join(name);
        ensure_within(&self.base_path, &raw)
    }
}

/// Reject names that could escape the store or address a sidecar.
fn validate_name(name: &str) -> Result<(), ServerError> {
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
        || name.ends_with(META_SUFFIX)
    {
        return Err(ServerError::BadRequest(format!("Invalid file name: {name}")));
    }
    Ok(())
}

/// Alphanumeric extension of an uploaded file name, if any.
fn extension_of(original_name: &str) -> Option<&str> {
    let (_, ext) = original_name.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 16 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}

fn fallback_meta(name: &str) -> FileMeta {
    FileMeta {
        original_name: name.to_string(),
        content_type: "application/octet-stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (FileStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let (store, _dir) = test_store().await;

        let stored = store.store("cat.png", "image/png", b"png-bytes").await.unwrap();
        assert!(stored.name.ends_with(".png"));
        assert_eq!(stored.reference, format!("/api/files/download/{}", stored.name));
        assert_eq!(stored.size, 9);

        let (data, meta) = store.load(&stored.name).await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert_eq!(meta.content_type, "image/png");
        assert_eq!(meta.original_name, "cat.png");
    }

    #[tokio::test]
    async fn test_unique_names() {
        let (store, _dir) = test_store().await;
        let a = store.store("a.txt", "text/plain", b"1").await.unwrap();
        let b = store.store("a.txt", "text/plain", b"2").await.unwrap();
        assert_ne!(a.name, b.name);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.store("x", "text/plain", b"").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.store("x", "text/plain", &[0u8; 2048]).await,
            Err(ServerError::FileTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_not_found() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.load("missing.bin").await,
            Err(ServerError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_traversal_and_sidecar_rejected() {
        let (store, _dir) = test_store().await;
        let stored = store.store("a.txt", "text/plain", b"1").await.unwrap();

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load("sub/file").await.is_err());
        assert!(store
            .load(&format!("{}{}", stored.name, META_SUFFIX))
            .await
            .is_err());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("report.final.pdf"), Some("pdf"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of("weird.p/f"), None);
    }
}
