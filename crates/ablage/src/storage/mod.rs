//! Storage collaborators.
//!
//! The processing core never talks to a database or an object store directly.
//! It reads and updates document records through a [`DocumentStore`] and reads
//! and writes byte streams through a [`BlobStore`]. Both are traits so the
//! surrounding application can plug in its own persistence; in-memory and
//! local filesystem adapters are provided for tests and single-process use.

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::{MemoryBlobStore, MemoryDocumentStore};

use crate::core::config::StorageConfig;
use crate::types::{BlobRef, Document, DocumentId, DocumentUpdate, StorageBackend};
use crate::{AblageError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Read/update access to document records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Load the current state of a document.
    ///
    /// # Errors
    ///
    /// `AblageError::DocumentNotFound` if no record exists.
    async fn get(&self, id: DocumentId) -> Result<Document>;

    /// Persist the fields set in `update` as one atomic write and return the
    /// record as stored afterwards. Fields left unset are not touched.
    async fn apply_update(&self, id: DocumentId, update: &DocumentUpdate) -> Result<Document>;
}

/// Backend-specific location of a blob, handed to services that fetch
/// content themselves (e.g. an OCR service reading from a bucket).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub backend: StorageBackend,
    pub location: String,
}

impl fmt::Display for StorageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

/// Byte-stream access to the blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Which backend this store is.
    fn backend(&self) -> StorageBackend;

    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>>;

    async fn write(&self, blob: &BlobRef, bytes: Vec<u8>) -> Result<()>;

    async fn exists(&self, blob: &BlobRef) -> Result<bool>;

    /// Backend-specific reference for `blob`.
    fn storage_ref(&self, blob: &BlobRef) -> StorageRef;
}

/// Build the blob store a config section describes.
///
/// Only the backends with a built-in adapter can be created here; object
/// stores are expected to be provided by the embedding application.
pub fn blob_store_from_config(config: &StorageConfig) -> Result<Arc<dyn BlobStore>> {
    match config.backend {
        StorageBackend::Local => {
            let root = config
                .root
                .clone()
                .ok_or_else(|| AblageError::configuration("storage.root is required for the local backend"))?;
            Ok(Arc::new(LocalBlobStore::new(root)?))
        }
        StorageBackend::Memory => Ok(Arc::new(MemoryBlobStore::new())),
        other => Err(AblageError::configuration(format!(
            "No built-in client for storage backend '{}'; provide a BlobStore implementation",
            other
        ))),
    }
}
