//! End-to-end pipeline scenarios over the built-in stages.
//!
//! Everything runs against the in-memory stores; external services (OCR,
//! thumbnail rendering) are replaced by scripted collaborators registered
//! under the built-in keys.

use ablage::core::config::PipelineConfig;
use ablage::core::orchestrator::{Orchestrator, Submission};
use ablage::core::pipeline::Pipeline;
use ablage::plugins::{Plugin, Stage, StageContext, StageOutcome, StageRegistry};
use ablage::stages::ocr::{OcrJobStatus, OcrPoll, OcrService, OcrStage};
use ablage::stages::thumbnail::{RenderRequest, ThumbnailRenderer, ThumbnailStage, TokenSigner};
use ablage::storage::{MemoryBlobStore, MemoryDocumentStore, StorageRef};
use ablage::types::{BlobRef, Document, DocumentId, DocumentUpdate, ProcessingReport, StageStatus, StorageBackend};
use ablage::{AblageError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

const FRENCH: &str =
    "Bonjour le monde, nous sommes très heureux de vous présenter ce document en français aujourd'hui.";

/// Collects the fields of every ERROR event.
struct ErrorCollector {
    events: Arc<Mutex<Vec<BTreeMap<String, String>>>>,
}

#[derive(Default)]
struct FieldVisitor(BTreeMap<String, String>);

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for ErrorCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        self.events.lock().unwrap().push(visitor.0);
    }
}

fn stage_config(stages: &[&str]) -> PipelineConfig {
    PipelineConfig {
        stages: stages.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

struct Fixture {
    documents: Arc<MemoryDocumentStore>,
    blobs: Arc<MemoryBlobStore>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    fn on_bucket() -> Self {
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            blobs: Arc::new(MemoryBlobStore::with_backend(StorageBackend::S3, "dms-originals")),
        }
    }

    fn upload(&self, name: &str, mime_type: &str, bytes: &[u8]) -> DocumentId {
        let blob = BlobRef::new(format!("originals/{}", name));
        self.blobs.put(&blob, bytes.to_vec());
        self.documents.insert(Document::new(name, mime_type, blob))
    }

    fn pipeline(&self, config: PipelineConfig, registry: &StageRegistry) -> Arc<Pipeline> {
        Pipeline::initialize(config, registry, self.documents.clone(), self.blobs.clone()).unwrap()
    }

    fn document(&self, id: DocumentId) -> Document {
        self.documents.snapshot(id).unwrap()
    }

    fn cache_text(&self, id: DocumentId, text: &str) {
        let mut document = self.document(id);
        document.text = Some(text.to_string());
        self.documents.insert(document);
    }
}

async fn run_inline(pipeline: Arc<Pipeline>, id: DocumentId, force: bool) -> ProcessingReport {
    match Orchestrator::inline(pipeline).apply_processing(id, force).await.unwrap() {
        Submission::Completed(report) => report,
        other => panic!("unexpected submission: {other:?}"),
    }
}

#[tokio::test]
async fn test_basic_pipeline_extracts_detects_and_indexes() {
    let fixture = Fixture::new();
    let id = fixture.upload("bonjour.txt", "text/plain", FRENCH.as_bytes());
    let pipeline = fixture.pipeline(
        stage_config(&["text-extraction", "language-detection", "search-vector"]),
        &StageRegistry::with_builtins(),
    );

    let report = run_inline(pipeline, id, false).await;

    assert!(report.is_clean(), "unexpected failures: {:?}", report.stages);
    assert_eq!(report.stage_order(), vec!["text-extraction", "language-detection", "search-vector"]);

    let document = fixture.document(id);
    assert_eq!(document.text.as_deref(), Some(FRENCH));
    assert_eq!(document.page_count, Some(1));
    assert_eq!(document.language.as_deref(), Some("french"));
    let vector = document.search_vector.unwrap();
    assert_eq!(vector.config, "french");
    assert!(vector.contains("bonjour"));
    assert!(vector.contains("monde"));
}

#[tokio::test]
async fn test_already_extracted_text_is_kept() {
    let fixture = Fixture::new();
    let id = fixture.upload("bonjour.txt", "text/plain", FRENCH.as_bytes());
    fixture.cache_text(id, "cached text");
    let pipeline = fixture.pipeline(
        stage_config(&["text-extraction", "language-detection", "search-vector"]),
        &StageRegistry::with_builtins(),
    );

    let report = run_inline(pipeline, id, false).await;

    assert!(matches!(
        report.status_of("text-extraction"),
        Some(StageStatus::Skipped { .. })
    ));
    assert!(matches!(
        report.status_of("language-detection"),
        Some(StageStatus::Applied { .. })
    ));

    let document = fixture.document(id);
    assert_eq!(document.text.as_deref(), Some("cached text"));
    assert!(document.language.is_some());
    assert!(document.search_vector.unwrap().contains("cached"));
}

#[tokio::test]
async fn test_forced_reprocess_overwrites_cached_text() {
    let fixture = Fixture::new();
    let id = fixture.upload("bonjour.txt", "text/plain", FRENCH.as_bytes());
    fixture.cache_text(id, "cached text");
    let pipeline = fixture.pipeline(
        stage_config(&["text-extraction", "language-detection", "search-vector"]),
        &StageRegistry::with_builtins(),
    );

    let report = run_inline(pipeline, id, true).await;

    assert!(report.force);
    assert!(report.is_clean());
    let document = fixture.document(id);
    assert_eq!(document.text.as_deref(), Some(FRENCH));
    assert_eq!(document.language.as_deref(), Some("french"));
    assert!(!document.search_vector.unwrap().contains("cached"));
}

struct Scripted {
    name: &'static str,
    fail: bool,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

impl Plugin for Scripted {
    fn name(&self) -> &str {
        self.name
    }
    fn version(&self) -> String {
        "1.0.0".to_string()
    }
    fn initialize(&self) -> Result<()> {
        Ok(())
    }
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Stage for Scripted {
    async fn process(&self, document: &Document, _: bool, _: &StageContext) -> Result<StageOutcome> {
        self.calls.lock().unwrap().push(self.name);
        if self.fail {
            return Err(AblageError::plugin(self.name, "always fails"));
        }
        let note = format!("{}{}", document.text.as_deref().unwrap_or_default(), self.name);
        Ok(StageOutcome::Updated(DocumentUpdate::new().text(note)))
    }
}

#[tokio::test]
async fn test_one_failing_stage_is_logged_once_and_isolated() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(ErrorCollector { events: events.clone() });
    let _guard = tracing::subscriber::set_default(subscriber);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for (name, fail) in [("a", false), ("b", true), ("c", false)] {
        registry
            .register_instance(Arc::new(Scripted {
                name,
                fail,
                calls: calls.clone(),
            }))
            .unwrap();
    }

    let fixture = Fixture::new();
    let id = fixture.upload("x.txt", "text/plain", b"x");
    let pipeline = fixture.pipeline(stage_config(&["a", "b", "c"]), &registry);

    let report = run_inline(pipeline, id, false).await;

    assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(fixture.document(id).text.as_deref(), Some("ac"));
    assert!(matches!(report.status_of("b"), Some(StageStatus::Failed { .. })));
    assert_eq!(report.failures().count(), 1);

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1, "expected exactly one error event: {events:?}");
    assert_eq!(events[0].get("stage").map(String::as_str), Some("b"));
    assert_eq!(events[0].get("document_id"), Some(&id.to_string()));
}

#[tokio::test]
async fn test_order_follows_configuration_not_registration() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut registry = StageRegistry::new();
    for name in ["first", "second", "third"] {
        registry
            .register_instance(Arc::new(Scripted {
                name,
                fail: name == "first",
                calls: calls.clone(),
            }))
            .unwrap();
    }

    let fixture = Fixture::new();
    let id = fixture.upload("x.txt", "text/plain", b"x");
    let pipeline = fixture.pipeline(stage_config(&["third", "first", "second"]), &registry);

    let report = run_inline(pipeline, id, false).await;
    assert_eq!(*calls.lock().unwrap(), vec!["third", "first", "second"]);
    assert_eq!(report.stage_order(), vec!["third", "first", "second"]);
}

#[tokio::test]
async fn test_unsupported_storage_recorded_and_chain_continues() {
    let fixture = Fixture::new();
    let id = fixture.upload("bonjour.txt", "text/plain", FRENCH.as_bytes());
    let pipeline = fixture.pipeline(
        stage_config(&["cloud-ocr", "text-extraction"]),
        &StageRegistry::with_builtins(),
    );

    let report = run_inline(pipeline, id, false).await;

    match report.status_of("cloud-ocr") {
        Some(StageStatus::Failed { error }) => {
            assert!(error.contains("does not support storage backend 'memory'"), "{error}");
            assert!(error.contains("s3, gcs"), "{error}");
        }
        other => panic!("unexpected status: {other:?}"),
    }
    assert!(matches!(
        report.status_of("text-extraction"),
        Some(StageStatus::Applied { .. })
    ));
    assert_eq!(fixture.document(id).text.as_deref(), Some(FRENCH));
}

struct FakeOcr {
    jobs: Mutex<Vec<StorageRef>>,
}

#[async_trait]
impl OcrService for FakeOcr {
    async fn start_job(&self, source: &StorageRef) -> Result<String> {
        self.jobs.lock().unwrap().push(source.clone());
        Ok(format!("job-{}", self.jobs.lock().unwrap().len()))
    }

    async fn poll(&self, _: &str) -> Result<OcrPoll> {
        Ok(OcrPoll {
            status: OcrJobStatus::Succeeded,
            pages: vec!["Rechnung Nummer 42".to_string(), "Bitte überweisen Sie den Betrag".to_string()],
            error: None,
        })
    }
}

struct FakeRenderer {
    renders: Mutex<usize>,
}

#[async_trait]
impl ThumbnailRenderer for FakeRenderer {
    async fn render(&self, _: &RenderRequest) -> Result<Vec<u8>> {
        *self.renders.lock().unwrap() += 1;
        Ok(b"\x89PNG".to_vec())
    }
}

fn full_registry(config: &PipelineConfig, ocr: Arc<FakeOcr>, renderer: Arc<FakeRenderer>) -> StageRegistry {
    let mut registry = StageRegistry::with_builtins();
    registry
        .register_instance(Arc::new(OcrStage::new(ocr, &config.ocr)))
        .unwrap();
    registry
        .register_instance(Arc::new(ThumbnailStage::new(
            renderer,
            TokenSigner::new("secret", Duration::from_secs(60)),
            "https://dms.example/download",
        )))
        .unwrap();
    registry
}

#[tokio::test]
async fn test_every_stage_is_idempotent_and_force_reruns() {
    let fixture = Fixture::on_bucket();
    let id = fixture.upload("scan.png", "image/png", b"\x89PNG scan");
    let mut config = PipelineConfig::default();
    config.ocr.poll_interval_ms = 1;

    let ocr = Arc::new(FakeOcr { jobs: Mutex::new(Vec::new()) });
    let renderer = Arc::new(FakeRenderer { renders: Mutex::new(0) });
    let registry = full_registry(&config, ocr.clone(), renderer.clone());
    let pipeline = fixture.pipeline(config, &registry);

    let first = run_inline(pipeline.clone(), id, false).await;
    // Images have no text layer; OCR fills it in.
    assert!(matches!(first.status_of("text-extraction"), Some(StageStatus::Failed { .. })));
    for stage in ["cloud-ocr", "language-detection", "search-vector", "thumbnail"] {
        assert!(
            matches!(first.status_of(stage), Some(StageStatus::Applied { .. })),
            "{stage}: {:?}",
            first.status_of(stage)
        );
    }
    let after_first = fixture.document(id);
    assert_eq!(
        after_first.text.as_deref(),
        Some("Rechnung Nummer 42\nBitte überweisen Sie den Betrag")
    );
    assert_eq!(ocr.jobs.lock().unwrap()[0].location, "s3://dms-originals/originals/scan.png");
    assert!(after_first.thumbnail.is_some());

    let second = run_inline(pipeline.clone(), id, false).await;
    for report in &second.stages {
        assert!(
            matches!(report.status, StageStatus::Skipped { .. }),
            "{} did work on the second run: {:?}",
            report.stage,
            report.status
        );
    }
    assert_eq!(fixture.document(id), after_first);
    assert_eq!(ocr.jobs.lock().unwrap().len(), 1);
    assert_eq!(*renderer.renders.lock().unwrap(), 1);

    let forced = run_inline(pipeline, id, true).await;
    for stage in ["cloud-ocr", "language-detection", "search-vector", "thumbnail"] {
        assert!(matches!(forced.status_of(stage), Some(StageStatus::Applied { .. })));
    }
    assert_eq!(ocr.jobs.lock().unwrap().len(), 2);
    assert_eq!(*renderer.renders.lock().unwrap(), 2);
}

#[tokio::test]
async fn test_all_stages_failing_leaves_document_readable() {
    let fixture = Fixture::new();
    let id = fixture.upload("blob.bin", "application/octet-stream", b"\x00\x01");
    let pipeline = fixture.pipeline(
        stage_config(&["text-extraction", "cloud-ocr"]),
        &StageRegistry::with_builtins(),
    );

    let report = run_inline(pipeline, id, false).await;

    assert_eq!(report.failures().count(), 2);
    let document = fixture.document(id);
    assert_eq!(document.text, None);
    assert_eq!(document.language, None);
    assert_eq!(document.thumbnail, None);
}

#[test]
fn test_unknown_stage_stops_initialization() {
    let fixture = Fixture::new();
    let err = Pipeline::initialize(
        stage_config(&["text-extraction", "virus-scan"]),
        &StageRegistry::with_builtins(),
        fixture.documents.clone(),
        fixture.blobs.clone(),
    )
    .unwrap_err();

    assert!(err.is_fatal_configuration());
    assert!(err.to_string().contains("virus-scan"));
}
