use super::{BlobStore, StorageRef};
use crate::types::{BlobRef, StorageBackend};
use crate::{AblageError, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

/// Blobs stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the store, creating `root` if it doesn't exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a blob key to a path, refusing keys that leave the root.
    fn path_for(&self, blob: &BlobRef) -> Result<PathBuf> {
        let key = Path::new(blob.key());
        let escapes = key
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if blob.key().is_empty() || escapes {
            return Err(AblageError::validation(format!(
                "Blob key '{}' must be a relative path inside the storage root",
                blob
            )));
        }

        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Local
    }

    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        let path = self.path_for(blob)?;
        Ok(tokio::fs::read(path).await?)
    }

    async fn write(&self, blob: &BlobRef, bytes: Vec<u8>) -> Result<()> {
        let path = self.path_for(blob)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so readers never observe a half-written blob.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let written = match tokio::fs::write(&tmp, bytes).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            if let Err(cleanup) = tokio::fs::remove_file(&tmp).await {
                tracing::debug!(path = %tmp.display(), error = %cleanup, "Temporary blob not removed");
            }
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool> {
        let path = self.path_for(blob)?;
        Ok(tokio::fs::try_exists(path).await?)
    }

    fn storage_ref(&self, blob: &BlobRef) -> StorageRef {
        StorageRef {
            backend: StorageBackend::Local,
            location: format!("file://{}", self.root.join(blob.key()).display()),
        }
    }
}
