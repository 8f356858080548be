//! Object upload capability.
//!
//! Image messages and avatars go through an uploader that returns a
//! public URL plus an object id. The filesystem implementation serves
//! development; production deployments swap in a CDN-backed one.

use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::shared::error::AppError;

/// A stored object: where clients fetch it and how the platform refers
/// to it.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub url: String,
    pub id: String,
}

/// Upload seam.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<StoredObject, AppError>;
}

/// Writes objects under a local directory.
pub struct LocalObjectStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

#[async_trait]
impl ObjectUploader for LocalObjectStore {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<StoredObject, AppError> {
        let id = Uuid::new_v4().simple().to_string();
        // keep only the extension of the client-supplied name
        let extension = std::path::Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let object_name = format!("{id}.{extension}");

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| AppError::Internal(format!("upload dir unavailable: {e}")))?;
        tokio::fs::write(self.root.join(&object_name), bytes)
            .await
            .map_err(|e| AppError::Internal(format!("upload write failed: {e}")))?;

        Ok(StoredObject {
            url: format!("{}/{}", self.public_base_url.trim_end_matches('/'), object_name),
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_returns_url_and_id() {
        let dir = std::env::temp_dir().join(format!("sayhi-uploads-{}", Uuid::new_v4()));
        let store = LocalObjectStore::new(&dir, "/uploads");
        let stored = store.upload(b"png".to_vec(), "avatar.png").await.unwrap();
        assert!(stored.url.starts_with("/uploads/"));
        assert!(stored.url.ends_with(".png"));
        assert!(!stored.id.is_empty());
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
