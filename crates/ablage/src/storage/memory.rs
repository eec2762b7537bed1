use super::{BlobStore, DocumentStore, StorageRef};
use crate::types::{BlobRef, Document, DocumentId, DocumentUpdate, StorageBackend};
use crate::{AblageError, Result};
use async_trait::async_trait;
use dashmap::DashMap;

/// Document records held in process memory.
///
/// `apply_update` holds the record's shard lock for the duration of the
/// write only, so concurrent runs on different documents never contend.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<DocumentId, Document>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, document: Document) -> DocumentId {
        let id = document.id;
        self.documents.insert(id, document);
        id
    }

    /// Current state of a record without going through the async trait.
    pub fn snapshot(&self, id: DocumentId) -> Option<Document> {
        self.documents.get(&id).map(|d| d.clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, id: DocumentId) -> Result<Document> {
        self.snapshot(id).ok_or(AblageError::DocumentNotFound(id))
    }

    async fn apply_update(&self, id: DocumentId, update: &DocumentUpdate) -> Result<Document> {
        let mut entry = self.documents.get_mut(&id).ok_or(AblageError::DocumentNotFound(id))?;
        update.apply_to(entry.value_mut());
        Ok(entry.value().clone())
    }
}

/// Blobs held in process memory.
///
/// The reported backend can be overridden so code paths that depend on the
/// backend kind (OCR service references) can run without a real object store.
#[derive(Debug)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
    backend: StorageBackend,
    bucket: String,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::with_backend(StorageBackend::Memory, "memory")
    }

    /// A memory store that reports itself as `backend`, with references
    /// rooted at `bucket`.
    pub fn with_backend(backend: StorageBackend, bucket: impl Into<String>) -> Self {
        Self {
            blobs: DashMap::new(),
            backend,
            bucket: bucket.into(),
        }
    }

    pub fn put(&self, blob: &BlobRef, bytes: impl Into<Vec<u8>>) {
        self.blobs.insert(blob.key().to_string(), bytes.into());
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn backend(&self) -> StorageBackend {
        self.backend
    }

    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>> {
        self.blobs.get(blob.key()).map(|b| b.clone()).ok_or_else(|| {
            AblageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("blob '{}' not found", blob),
            ))
        })
    }

    async fn write(&self, blob: &BlobRef, bytes: Vec<u8>) -> Result<()> {
        self.blobs.insert(blob.key().to_string(), bytes);
        Ok(())
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool> {
        Ok(self.blobs.contains_key(blob.key()))
    }

    fn storage_ref(&self, blob: &BlobRef) -> StorageRef {
        let scheme = match self.backend {
            StorageBackend::S3 => "s3",
            StorageBackend::Gcs => "gs",
            StorageBackend::Local => "file",
            StorageBackend::Memory => "memory",
        };
        StorageRef {
            backend: self.backend,
            location: format!("{}://{}/{}", scheme, self.bucket, blob.key()),
        }
    }
}
