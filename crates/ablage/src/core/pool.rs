//! Bounded worker pool for off-request processing.
//!
//! At most `workers` jobs run at once; the rest wait for a permit in
//! submission order. Every job gets a monitor that records its outcome and
//! logs failures and panics. The monitor is diagnostic only: the submitter has
//! already moved on, so nothing is re-raised. Callers that do want the result
//! can await the returned [`JobHandle`].

use crate::{AblageError, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, oneshot};

/// Counters describing pool activity since creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub submitted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub pending: usize,
}

struct PoolInner {
    permits: Arc<Semaphore>,
    runtime: Handle,
    workers: usize,
    closed: AtomicBool,
    pending: AtomicUsize,
    idle: Notify,
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Fixed-size pool of concurrent job slots on a tokio runtime.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// `AblageError::Submission` when called outside a tokio runtime, and
    /// `AblageError::Configuration` for a zero worker count.
    pub fn new(workers: usize) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| AblageError::Submission(format!("Worker pool needs a tokio runtime: {}", e)))?;
        Self::with_runtime(workers, runtime)
    }

    /// Create a pool that spawns its jobs on `runtime`.
    pub fn with_runtime(workers: usize, runtime: Handle) -> Result<Self> {
        if workers == 0 {
            return Err(AblageError::configuration("Worker pool needs at least one worker"));
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                permits: Arc::new(Semaphore::new(workers)),
                runtime,
                workers,
                closed: AtomicBool::new(false),
                pending: AtomicUsize::new(0),
                idle: Notify::new(),
                submitted: AtomicU64::new(0),
                succeeded: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                panicked: AtomicU64::new(0),
            }),
        })
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// Queue a job and return immediately.
    ///
    /// `label` identifies the job in logs.
    ///
    /// # Errors
    ///
    /// `AblageError::Submission` once the pool has been closed.
    pub fn submit<F, T>(&self, label: impl Into<String>, job: F) -> Result<JobHandle<T>>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(AblageError::Submission("Worker pool is closed".to_string()));
        }

        let label = label.into();
        let inner = Arc::clone(&self.inner);
        let permits = Arc::clone(&self.inner.permits);
        let (tx, rx) = oneshot::channel();

        inner.submitted.fetch_add(1, Ordering::Relaxed);
        inner.pending.fetch_add(1, Ordering::AcqRel);

        let task = self.inner.runtime.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| AblageError::Submission("Worker pool semaphore closed".to_string()))?;
            job.await
        });

        self.inner.runtime.spawn(async move {
            let outcome = match task.await {
                Ok(Ok(value)) => {
                    inner.succeeded.fetch_add(1, Ordering::Relaxed);
                    Ok(value)
                }
                Ok(Err(e)) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(job = %label, error = %e, "Pooled job failed");
                    Err(e)
                }
                Err(join_error) => {
                    inner.panicked.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(job = %label, error = %join_error, "Pooled job panicked or was cancelled");
                    Err(AblageError::Other(format!("Job '{}' did not complete: {}", label, join_error)))
                }
            };

            // The submitter may have dropped its handle; that's fine.
            let _ = tx.send(outcome);

            if inner.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                inner.idle.notify_waiters();
            }
        });

        Ok(JobHandle { receiver: rx })
    }

    /// Stop accepting new jobs. Jobs already submitted still run.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Wait until every submitted job has finished.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.inner.submitted.load(Ordering::Relaxed),
            succeeded: self.inner.succeeded.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            panicked: self.inner.panicked.load(Ordering::Relaxed),
            pending: self.inner.pending.load(Ordering::Acquire),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.inner.workers)
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Handle to a submitted job. Dropping it detaches the job.
#[derive(Debug)]
pub struct JobHandle<T> {
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> JobHandle<T> {
    /// Wait for the job's result.
    pub async fn wait(self) -> Result<T> {
        self.receiver
            .await
            .map_err(|_| AblageError::Submission("Job monitor dropped before reporting".to_string()))?
    }
}
