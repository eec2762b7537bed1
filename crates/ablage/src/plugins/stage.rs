//! Processing stage plugin trait.
//!
//! A stage is one independent unit of document processing: text extraction,
//! OCR, language detection, search indexing, thumbnailing.

use crate::core::config::PipelineConfig;
use crate::plugins::Plugin;
use crate::storage::{BlobStore, DocumentStore};
use crate::types::{Document, DocumentUpdate, StorageBackend};
use crate::{AblageError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// What a stage did with a document.
#[derive(Debug)]
pub enum StageOutcome {
    /// Nothing to do; the stage's output already exists or the stage is disabled.
    Skipped { reason: String },

    /// The stage computed these fields.
    Updated(DocumentUpdate),

    /// Some outputs were computed before a later step failed. The computed
    /// fields are persisted and the error is reported as the stage's failure.
    Partial { update: DocumentUpdate, error: AblageError },
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped { reason: reason.into() }
    }
}

/// Collaborators available to every stage.
#[derive(Clone)]
pub struct StageContext {
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: Arc<PipelineConfig>,
}

impl StageContext {
    pub fn new(documents: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>, config: Arc<PipelineConfig>) -> Self {
        Self {
            documents,
            blobs,
            config,
        }
    }

    /// Backend of the configured blob store.
    pub fn storage_backend(&self) -> StorageBackend {
        self.blobs.backend()
    }
}

/// Trait for processing stage plugins.
///
/// # Contract
///
/// - **Idempotent by default**: with `force == false`, a stage whose output
///   field is already populated returns [`StageOutcome::Skipped`] without doing
///   any work.
/// - **Force overrides skip**: with `force == true` the work is always done
///   and the output overwritten.
/// - **Report, don't persist**: the stage returns the fields it computed; the
///   pipeline persists them as one atomic update before the next stage runs.
/// - **Fail loudly**: a stage that cannot run in the active storage backend
///   returns `AblageError::UnsupportedStorage`; any other failure is returned
///   as an error. The pipeline logs it and moves on to the next stage.
///
/// # Example
///
/// ```rust
/// use ablage::plugins::{Plugin, Stage, StageContext, StageOutcome};
/// use ablage::types::{Document, DocumentUpdate};
/// use ablage::Result;
/// use async_trait::async_trait;
///
/// struct WordCount;
///
/// impl Plugin for WordCount {
///     fn name(&self) -> &str { "word-count" }
///     fn version(&self) -> String { "1.0.0".to_string() }
///     fn initialize(&self) -> Result<()> { Ok(()) }
///     fn shutdown(&self) -> Result<()> { Ok(()) }
/// }
///
/// #[async_trait]
/// impl Stage for WordCount {
///     async fn process(&self, document: &Document, force: bool, _ctx: &StageContext) -> Result<StageOutcome> {
///         if document.page_count.is_some() && !force {
///             return Ok(StageOutcome::skipped("page count already set"));
///         }
///         let words = document.text.as_deref().unwrap_or_default().split_whitespace().count();
///         Ok(StageOutcome::Updated(DocumentUpdate::new().page_count((words / 500 + 1) as u32)))
///     }
/// }
/// ```
#[async_trait]
pub trait Stage: Plugin {
    /// Process one document.
    ///
    /// `document` is the state as persisted after all earlier stages of this run.
    async fn process(&self, document: &Document, force: bool, ctx: &StageContext) -> Result<StageOutcome>;

    /// Storage backends this stage can run against. `None` means any backend.
    fn supported_backends(&self) -> Option<&[StorageBackend]> {
        None
    }
}

/// Fail with `UnsupportedStorage` if `stage` declares a backend set that
/// excludes `backend`.
pub fn ensure_backend_supported(stage: &dyn Stage, backend: StorageBackend) -> Result<()> {
    match stage.supported_backends() {
        Some(supported) if !supported.contains(&backend) => Err(AblageError::UnsupportedStorage {
            plugin: stage.name().to_string(),
            backend,
            supported: supported.to_vec(),
        }),
        _ => Ok(()),
    }
}
