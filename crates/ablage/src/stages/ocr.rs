//! Cloud OCR stage.
//!
//! The OCR service reads the original straight from the object store, so
//! the stage only hands over a [`StorageRef`] and polls the resulting job
//! with a fixed delay. It runs against the backends listed in
//! `ocr.supported_backends` and fails with `UnsupportedStorage` elsewhere.

use crate::core::config::{OcrConfig, PipelineConfig};
use crate::plugins::{Plugin, Stage, StageContext, StageOutcome};
use crate::storage::StorageRef;
use crate::types::{Document, DocumentUpdate, StorageBackend};
use crate::{AblageError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// State of a remote OCR job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrJobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

/// One poll of a remote OCR job. `pages` holds whatever text the service
/// has produced so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrPoll {
    pub status: OcrJobStatus,
    #[serde(default)]
    pub pages: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Job-submission and polling protocol of an OCR service.
#[async_trait]
pub trait OcrService: Send + Sync {
    /// Start recognizing the blob at `source`; returns the job id.
    async fn start_job(&self, source: &StorageRef) -> Result<String>;

    async fn poll(&self, job_id: &str) -> Result<OcrPoll>;
}

#[cfg(feature = "http")]
mod http {
    use super::*;

    #[derive(Serialize)]
    struct StartJobRequest<'a> {
        backend: StorageBackend,
        location: &'a str,
    }

    #[derive(Deserialize)]
    struct StartJobResponse {
        job_id: String,
    }

    /// OCR service client over HTTP with a bearer API key.
    ///
    /// `POST {endpoint}/jobs` starts a job, `GET {endpoint}/jobs/{id}` polls it.
    pub struct HttpOcrService {
        client: reqwest::Client,
        endpoint: String,
        api_key: Option<String>,
    }

    impl HttpOcrService {
        pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder().timeout(timeout).build().map_err(|e| {
                AblageError::configuration_with_source("Failed to create OCR HTTP client", e)
            })?;

            Ok(Self {
                client,
                endpoint: endpoint.into().trim_end_matches('/').to_string(),
                api_key,
            })
        }

        fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
            match &self.api_key {
                Some(key) => request.bearer_auth(key),
                None => request,
            }
        }

        async fn checked(response: reqwest::Response) -> Result<reqwest::Response> {
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            let body = response.text().await.unwrap_or_default();
            Err(AblageError::external("ocr", body, Some(status.as_u16())))
        }
    }

    #[async_trait]
    impl OcrService for HttpOcrService {
        async fn start_job(&self, source: &StorageRef) -> Result<String> {
            let request = self.client.post(format!("{}/jobs", self.endpoint)).json(&StartJobRequest {
                backend: source.backend,
                location: &source.location,
            });
            let response = Self::checked(self.authorized(request).send().await?).await?;
            let started: StartJobResponse = response.json().await?;
            Ok(started.job_id)
        }

        async fn poll(&self, job_id: &str) -> Result<OcrPoll> {
            let request = self.client.get(format!("{}/jobs/{}", self.endpoint, job_id));
            let response = Self::checked(self.authorized(request).send().await?).await?;
            Ok(response.json().await?)
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpOcrService;

/// Fills in text for documents without a text layer.
pub struct OcrStage {
    service: Option<Arc<dyn OcrService>>,
    supported_backends: Vec<StorageBackend>,
    poll_interval: Duration,
    max_polls: u32,
}

impl OcrStage {
    pub fn new(service: Arc<dyn OcrService>, config: &OcrConfig) -> Self {
        Self {
            service: Some(service),
            supported_backends: config.supported_backends.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        }
    }

    /// Build the stage from `ocr`. Without an endpoint the stage still
    /// resolves but every run fails with a plugin error for this stage.
    pub(crate) fn from_config(config: &PipelineConfig) -> Result<Arc<dyn Stage>> {
        let ocr = &config.ocr;
        let service: Option<Arc<dyn OcrService>> = match &ocr.endpoint {
            #[cfg(feature = "http")]
            Some(endpoint) => Some(Arc::new(HttpOcrService::new(
                endpoint.clone(),
                ocr.resolve_api_key(),
                Duration::from_secs(ocr.request_timeout_secs),
            )?)),
            #[cfg(not(feature = "http"))]
            Some(_) => {
                tracing::warn!("ocr.endpoint is set but the `http` feature is disabled");
                None
            }
            None => None,
        };

        Ok(Arc::new(Self {
            service,
            supported_backends: ocr.supported_backends.clone(),
            poll_interval: Duration::from_millis(ocr.poll_interval_ms),
            max_polls: ocr.max_polls,
        }))
    }

    async fn await_job(&self, service: &dyn OcrService, job_id: &str) -> Result<OcrPoll> {
        let mut last: Option<OcrPoll> = None;

        for attempt in 1..=self.max_polls {
            let poll = service.poll(job_id).await?;
            match poll.status {
                OcrJobStatus::Succeeded | OcrJobStatus::Failed => return Ok(poll),
                OcrJobStatus::Pending | OcrJobStatus::Running => {
                    tracing::trace!(job_id, attempt, "OCR job still running");
                    last = Some(poll);
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Ok(OcrPoll {
            status: OcrJobStatus::Failed,
            pages: last.map(|poll| poll.pages).unwrap_or_default(),
            error: Some(format!("job {} did not finish after {} polls", job_id, self.max_polls)),
        })
    }
}

fn joined_text(pages: &[String]) -> Option<String> {
    let text = pages
        .iter()
        .map(|page| page.trim())
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

impl Plugin for OcrStage {
    fn name(&self) -> &str {
        "cloud-ocr"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        if self.service.is_none() {
            tracing::warn!("cloud-ocr has no service endpoint configured; runs will fail");
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn description(&self) -> &str {
        "Recognizes text through an external OCR service"
    }
}

#[async_trait]
impl Stage for OcrStage {
    async fn process(&self, document: &Document, force: bool, ctx: &StageContext) -> Result<StageOutcome> {
        if !force && document.has_meaningful_text() {
            return Ok(StageOutcome::skipped("document already has text"));
        }

        let service = self
            .service
            .as_deref()
            .ok_or_else(|| AblageError::plugin(self.name(), "no service endpoint configured (ocr.endpoint)"))?;

        let source = ctx.blobs.storage_ref(&document.content);
        let job_id = service.start_job(&source).await?;
        tracing::debug!(document_id = %document.id, job_id = %job_id, source = %source, "OCR job started");

        let poll = self.await_job(service, &job_id).await?;
        let text = joined_text(&poll.pages);

        match (poll.status, text) {
            (OcrJobStatus::Succeeded, Some(text)) => Ok(StageOutcome::Updated(DocumentUpdate::new().text(text))),
            (OcrJobStatus::Succeeded, None) => Ok(StageOutcome::skipped("OCR found no text")),
            (_, partial) => {
                let error = AblageError::ocr(poll.error.unwrap_or_else(|| format!("job {} failed", job_id)));
                match partial {
                    Some(text) => Ok(StageOutcome::Partial {
                        update: DocumentUpdate::new().text(text),
                        error,
                    }),
                    None => Err(error),
                }
            }
        }
    }

    fn supported_backends(&self) -> Option<&[StorageBackend]> {
        Some(&self.supported_backends)
    }
}
