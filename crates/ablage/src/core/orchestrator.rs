//! Processing entry point.
//!
//! [`Orchestrator::apply_processing`] is what the upload path and the task
//! queue call after a document was stored. The orchestrator decides *where*
//! the run happens; [`Pipeline::run`] decides *what* happens, so both
//! strategies share stage order, failure isolation and skip rules.
//!
//! # Strategies
//!
//! - [`ExecutionStrategy::Pooled`] hands the run to a bounded [`WorkerPool`]
//!   and returns right away. Used from request handlers.
//! - [`ExecutionStrategy::Inline`] runs the stages on the calling task and
//!   returns the report. Used from task-queue workers that are already off the
//!   request path.
//!
//! # Example
//!
//! ```rust,no_run
//! use ablage::core::orchestrator::{Orchestrator, Submission};
//! # use ablage::core::pipeline::Pipeline;
//! # use ablage::types::DocumentId;
//! # use std::sync::Arc;
//! # async fn example(pipeline: Arc<Pipeline>, id: DocumentId) -> ablage::Result<()> {
//! let orchestrator = Orchestrator::pooled(pipeline)?;
//! match orchestrator.apply_processing(id, false).await? {
//!     Submission::Queued(handle) => drop(handle),
//!     other => println!("{:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

use crate::core::guard::InFlightGuard;
use crate::core::pipeline::Pipeline;
use crate::core::pool::{JobHandle, WorkerPool};
use crate::types::{DocumentId, ProcessingReport};
use crate::Result;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Runtime backing the blocking entry points and pools created outside a runtime.
static GLOBAL_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create global Tokio runtime - system may be out of resources")
});

/// Where a processing run executes.
#[derive(Debug, Clone)]
pub enum ExecutionStrategy {
    /// Run on the caller's task; the caller waits for every stage.
    Inline,
    /// Run on a worker pool; the caller gets a handle back immediately.
    Pooled(WorkerPool),
}

/// Result of [`Orchestrator::apply_processing`].
#[derive(Debug)]
pub enum Submission {
    /// The run finished on the caller's task.
    Completed(ProcessingReport),
    /// The run was queued. The handle may be awaited or dropped.
    Queued(ProcessingHandle),
    /// Another run for this document is still in flight (only with
    /// `pool.exclusive_documents`).
    AlreadyInFlight,
}

impl Submission {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Submission::AlreadyInFlight)
    }
}

/// Handle to a queued processing run.
#[derive(Debug)]
pub struct ProcessingHandle {
    document_id: DocumentId,
    inner: JobHandle<ProcessingReport>,
}

impl ProcessingHandle {
    pub fn document_id(&self) -> DocumentId {
        self.document_id
    }

    /// Wait for the queued run to finish.
    pub async fn wait(self) -> Result<ProcessingReport> {
        self.inner.wait().await
    }
}

/// Runs the shared pipeline for one document at a time, in the configured
/// execution strategy.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    strategy: ExecutionStrategy,
    guard: Option<Arc<InFlightGuard>>,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<Pipeline>, strategy: ExecutionStrategy) -> Self {
        let pool = &pipeline.config().pool;
        let guard = pool
            .exclusive_documents
            .then(|| Arc::new(InFlightGuard::new(Duration::from_secs(pool.in_flight_timeout_secs))));

        Self {
            pipeline,
            strategy,
            guard,
        }
    }

    pub fn inline(pipeline: Arc<Pipeline>) -> Self {
        Self::new(pipeline, ExecutionStrategy::Inline)
    }

    /// Pooled orchestrator sized from `pool.workers`.
    ///
    /// Jobs run on the current tokio runtime, or on the process-wide runtime
    /// when called from synchronous code.
    pub fn pooled(pipeline: Arc<Pipeline>) -> Result<Self> {
        let runtime = Handle::try_current().unwrap_or_else(|_| GLOBAL_RUNTIME.handle().clone());
        let pool = WorkerPool::with_runtime(pipeline.config().pool.workers, runtime)?;
        Ok(Self::new(pipeline, ExecutionStrategy::Pooled(pool)))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// Process one document.
    ///
    /// # Errors
    ///
    /// Inline: the document can't be loaded. Pooled: the pool refused the
    /// submission. Stage failures never surface here; they are logged and
    /// recorded in the report.
    pub async fn apply_processing(&self, document_id: DocumentId, force: bool) -> Result<Submission> {
        let ticket = match &self.guard {
            Some(guard) => match guard.try_acquire(document_id) {
                Some(ticket) => Some(ticket),
                None => {
                    tracing::info!(document_id = %document_id, "Processing already in flight; not resubmitting");
                    return Ok(Submission::AlreadyInFlight);
                }
            },
            None => None,
        };

        match &self.strategy {
            ExecutionStrategy::Inline => {
                let report = self.pipeline.run(document_id, force).await;
                drop(ticket);
                Ok(Submission::Completed(report?))
            }
            ExecutionStrategy::Pooled(pool) => {
                let pipeline = Arc::clone(&self.pipeline);
                let inner = pool.submit(format!("document {}", document_id), async move {
                    let _ticket = ticket;
                    pipeline.run(document_id, force).await
                })?;

                tracing::debug!(document_id = %document_id, force, "Processing queued");
                Ok(Submission::Queued(ProcessingHandle { document_id, inner }))
            }
        }
    }

    /// Blocking variant of [`apply_processing`](Self::apply_processing) for
    /// callers without a tokio runtime.
    ///
    /// Must not be called from inside an async context.
    pub fn apply_processing_sync(&self, document_id: DocumentId, force: bool) -> Result<Submission> {
        GLOBAL_RUNTIME.block_on(self.apply_processing(document_id, force))
    }

    /// Stop accepting pooled work and wait for queued runs to drain.
    pub async fn shutdown(&self) {
        if let ExecutionStrategy::Pooled(pool) = &self.strategy {
            pool.close();
            pool.wait_idle().await;
        }
    }
}
