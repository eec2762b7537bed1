//! Per-document stage loop.
//!
//! [`Pipeline`] owns the resolved stage set and the storage collaborators and
//! runs every stage against one document in configured order. Both execution
//! strategies in [`crate::core::orchestrator`] call [`Pipeline::run`], so the
//! per-document behavior is identical whichever strategy is used.
//!
//! Failure isolation: a stage error (or panic) is logged with the stage name
//! and document id, recorded in the report, and the loop moves on. Fields a
//! stage computed are persisted right after it returns, before the next stage
//! sees the document; there is no rollback.

use crate::core::config::PipelineConfig;
use crate::plugins::{Stage, StageContext, StageOutcome, StageRegistry, StageSet, ensure_backend_supported};
use crate::storage::{BlobStore, DocumentStore};
use crate::types::{Document, DocumentId, DocumentUpdate, ProcessingReport, StageReport, StageStatus};
use crate::{AblageError, Result};
use futures_util::FutureExt;
use once_cell::sync::OnceCell;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

static GLOBAL_PIPELINE: OnceCell<Arc<Pipeline>> = OnceCell::new();

/// Resolved stages plus the collaborators they run against.
///
/// Built once at startup through [`Pipeline::initialize`] and shared by
/// reference count with every orchestrator.
pub struct Pipeline {
    stages: StageSet,
    context: StageContext,
}

impl Pipeline {
    /// One-time initialization: resolve `config.stages` through `registry`
    /// and bind the storage collaborators.
    ///
    /// # Errors
    ///
    /// `AblageError::Configuration` if the config is invalid or any stage
    /// identifier can't be resolved. The process should not start serving
    /// processing requests in that case.
    pub fn initialize(
        config: PipelineConfig,
        registry: &StageRegistry,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let stages = registry.resolve(&config)?;

        tracing::info!(
            stages = ?stages.names(),
            storage = %blobs.backend(),
            workers = config.pool.workers,
            "Processing pipeline initialized"
        );

        Ok(Arc::new(Self {
            stages,
            context: StageContext::new(documents, blobs, Arc::new(config)),
        }))
    }

    /// Assemble a pipeline from an already resolved stage set.
    pub fn from_parts(stages: StageSet, context: StageContext) -> Arc<Self> {
        Arc::new(Self { stages, context })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.context.config
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.names()
    }

    /// Run every stage against one document.
    ///
    /// # Errors
    ///
    /// Only orchestrator-level failures are returned: the document can't be
    /// loaded. Stage failures end up in the report.
    pub async fn run(&self, document_id: DocumentId, force: bool) -> Result<ProcessingReport> {
        let span = tracing::info_span!("apply_processing", document_id = %document_id, force);
        self.run_stages(document_id, force).instrument(span).await
    }

    async fn run_stages(&self, document_id: DocumentId, force: bool) -> Result<ProcessingReport> {
        let started = Instant::now();
        let mut document = self.context.documents.get(document_id).await?;
        let backend = self.context.storage_backend();
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in self.stages.iter() {
            let stage_started = Instant::now();
            let name = stage.name().to_string();

            let status = match ensure_backend_supported(stage.as_ref(), backend) {
                Err(e) => self.record_failure(&name, document_id, e),
                Ok(()) => {
                    let outcome = self.invoke(stage, &document, force).await;
                    self.settle(&name, &mut document, outcome).await
                }
            };

            reports.push(StageReport {
                stage: name,
                status,
                elapsed_ms: stage_started.elapsed().as_millis() as u64,
            });
        }

        let report = ProcessingReport {
            document_id,
            force,
            stages: reports,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        let failed = report.failures().count();
        tracing::info!(
            stages = report.stages.len(),
            failed,
            elapsed_ms = report.elapsed_ms,
            "Document processing finished"
        );

        Ok(report)
    }

    /// Call one stage, turning a panic into an error for that stage only.
    async fn invoke(&self, stage: &Arc<dyn Stage>, document: &Document, force: bool) -> Result<StageOutcome> {
        match AssertUnwindSafe(stage.process(document, force, &self.context))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(AblageError::plugin(stage.name(), format!("stage panicked: {}", message)))
            }
        }
    }

    /// Persist what a stage computed and translate its outcome into a status.
    async fn settle(&self, name: &str, document: &mut Document, outcome: Result<StageOutcome>) -> StageStatus {
        let document_id = document.id;

        match outcome {
            Ok(StageOutcome::Skipped { reason }) => {
                tracing::debug!(stage = name, %reason, "Stage skipped");
                StageStatus::Skipped { reason }
            }
            Ok(StageOutcome::Updated(update)) => match self.persist(document, &update).await {
                Ok(fields) => {
                    tracing::debug!(stage = name, fields = ?fields, "Stage applied");
                    StageStatus::Applied { fields }
                }
                Err(e) => self.record_failure(name, document_id, e),
            },
            Ok(StageOutcome::Partial { update, error }) => match self.persist(document, &update).await {
                Ok(fields) => {
                    tracing::error!(
                        stage = name,
                        document_id = %document_id,
                        fields = ?fields,
                        error = %error,
                        "Stage failed after computing some fields; kept what was computed"
                    );
                    StageStatus::Partial {
                        fields,
                        error: error.to_string(),
                    }
                }
                Err(e) => self.record_failure(name, document_id, e),
            },
            Err(e) => self.record_failure(name, document_id, e),
        }
    }

    async fn persist(&self, document: &mut Document, update: &DocumentUpdate) -> Result<Vec<String>> {
        let fields: Vec<String> = update.field_names().into_iter().map(str::to_string).collect();
        if update.is_empty() {
            return Ok(fields);
        }

        *document = self.context.documents.apply_update(document.id, update).await?;
        Ok(fields)
    }

    fn record_failure(&self, name: &str, document_id: DocumentId, error: AblageError) -> StageStatus {
        tracing::error!(
            stage = name,
            document_id = %document_id,
            error = %error,
            transient = error.is_transient(),
            "Stage failed; continuing with next stage"
        );
        StageStatus::Failed {
            error: error.to_string(),
        }
    }

    /// Shut down every stage once.
    pub fn shutdown(&self) {
        self.stages.shutdown_all();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("storage", &self.context.storage_backend())
            .finish()
    }
}

/// Install the process-wide pipeline.
///
/// # Errors
///
/// `AblageError::Configuration` if a pipeline was already installed.
pub fn install_global(pipeline: Arc<Pipeline>) -> Result<()> {
    GLOBAL_PIPELINE
        .set(pipeline)
        .map_err(|_| AblageError::configuration("A global processing pipeline is already installed"))
}

/// The process-wide pipeline, if one was installed.
pub fn global() -> Option<Arc<Pipeline>> {
    GLOBAL_PIPELINE.get().cloned()
}
