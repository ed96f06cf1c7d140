//! Disk storage for uploaded message attachments.
//!
//! Files are content-addressed: the name is the BLAKE3 hash of the bytes
//! plus the sanitized extension of the uploaded file, so re-uploading the
//! same file reuses the stored copy.

use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::ServerError;

/// Public prefix under which stored attachments are served.
pub const UPLOADS_ROUTE: &str = "/uploads";

const MAX_EXTENSION_LEN: usize = 10;

/// Verify that a resolved path stays within the expected base directory.
fn ensure_within(base: &Path, target: &Path) -> Result<PathBuf, ServerError> {
    let mut resolved = base.to_path_buf();
    for component in target.strip_prefix(base).unwrap_or(target).components() {
        match component {
            Component::Normal(c) => resolved.push(c),
            Component::CurDir => {}
            _ => {
                return Err(ServerError::BadRequest("Path traversal detected".to_string()));
            }
        }
    }
    if !resolved.starts_with(base) || resolved == base {
        return Err(ServerError::BadRequest("Path traversal detected".to_string()));
    }
    Ok(resolved)
}

/// Lowercased alphanumeric extension of an uploaded file name, if usable.
fn sanitized_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > MAX_EXTENSION_LEN || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// A stored attachment, as handed to the message engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttachment {
    /// Public path, e.g. `/uploads/<hash>.png`.
    pub path: String,
    pub content_type: String,
    /// Original file name with any directory part stripped.
    pub file_name: String,
}

#[derive(Debug, Clone)]
pub struct DiskAttachments {
    base_path: PathBuf,
    max_size: usize,
}

impl DiskAttachments {
    pub async fn new(base_path: PathBuf, max_size: usize) -> Result<Self, ServerError> {
        fs::create_dir_all(&base_path).await.map_err(|e| {
            ServerError::AttachmentStorage(format!(
                "Failed to create upload directory '{}': {}",
                base_path.display(),
                e
            ))
        })?;
        let base_path = base_path.canonicalize().unwrap_or(base_path);

        info!(path = %base_path.display(), max_size, "Attachment store initialized");

        Ok(Self { base_path, max_size })
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn store(
        &self,
        original_name: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<StoredAttachment, ServerError> {
        if data.is_empty() {
            return Err(ServerError::BadRequest("Empty file".to_string()));
        }
        if data.len() > self.max_size {
            return Err(ServerError::AttachmentTooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let file_name = Path::new(original_name.trim())
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let digest = hex::encode(blake3::hash(data).as_bytes());
        let name = match sanitized_extension(&file_name) {
            Some(ext) => format!("{digest}.{ext}"),
            None => digest,
        };

        let path = self.safe_path(&name)?;
        if fs::try_exists(&path).await.unwrap_or(false) {
            debug!(name = %name, "Attachment already stored");
        } else {
            fs::write(&path, data).await.map_err(|e| {
                ServerError::AttachmentStorage(format!("Failed to write attachment {}: {}", name, e))
            })?;
            debug!(name = %name, size = data.len(), "Stored attachment");
        }

        let content_type = match content_type.trim() {
            "" => mime_guess::from_path(&file_name)
                .first_or_octet_stream()
                .to_string(),
            given => given.to_string(),
        };

        Ok(StoredAttachment {
            path: format!("{UPLOADS_ROUTE}/{name}"),
            content_type,
            file_name,
        })
    }

    /// Read a stored attachment back, with the MIME type to serve it as.
    pub async fn open(&self, name: &str) -> Result<(Vec<u8>, String), ServerError> {
        if name.contains('/') || name.contains('\\') || name.contains("..") {
            return Err(ServerError::BadRequest("Path traversal detected".to_string()));
        }
        let path = self.safe_path(name)?;

        let data = match fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ServerError::AttachmentNotFound);
            }
            Err(e) => {
                return Err(ServerError::AttachmentStorage(format!(
                    "Failed to read attachment {}: {}",
                    name, e
                )));
            }
        };

        let content_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
        Ok((data, content_type))
    }

    fn safe_path(&self, name: &str) -> Result<PathBuf, ServerError> {
        ensure_within(&self.base_path, &self.base_path.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_store() -> (DiskAttachments, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = DiskAttachments::new(dir.path().to_path_buf(), 1024).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_store_and_open() {
        let (store, _dir) = test_store().await;
        let stored = store.store("holiday.PNG", "image/png", b"png-bytes").await.unwrap();

        let digest = hex::encode(blake3::hash(b"png-bytes").as_bytes());
        assert_eq!(stored.path, format!("/uploads/{digest}.png"));
        assert_eq!(stored.file_name, "holiday.PNG");

        let name = stored.path.trim_start_matches("/uploads/");
        let (data, content_type) = store.open(name).await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn test_same_bytes_share_a_name() {
        let (store, _dir) = test_store().await;
        let a = store.store("a.txt", "text/plain", b"same").await.unwrap();
        let b = store.store("../../b.txt", "", b"same").await.unwrap();
        assert_eq!(a.path, b.path);
        assert_eq!(b.file_name, "b.txt");
        assert_eq!(b.content_type, "text/plain");
    }

    #[tokio::test]
    async fn test_odd_extensions_are_dropped() {
        let (store, _dir) = test_store().await;
        let stored = store.store("script.sh;rm", "", b"x").await.unwrap();
        assert!(!stored.path.contains('.'));
        assert_eq!(stored.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn test_limits() {
        let (store, _dir) = test_store().await;
        assert!(matches!(
            store.store("empty.txt", "", b"").await,
            Err(ServerError::BadRequest(_))
        ));
        assert!(matches!(
            store.store("big.bin", "", &[0u8; 2048]).await,
            Err(ServerError::AttachmentTooLarge { size: 2048, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_open_rejects_traversal_and_missing() {
        let (store, _dir) = test_store().await;
        assert!(matches!(store.open("../secret").await, Err(ServerError::BadRequest(_))));
        assert!(matches!(store.open("").await, Err(ServerError::BadRequest(_))));
        assert!(matches!(store.open("deadbeef.png").await, Err(ServerError::AttachmentNotFound)));
    }
}
