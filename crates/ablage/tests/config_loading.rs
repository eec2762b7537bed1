//! Configuration files driving pipeline startup.
//!
//! Covers:
//! - stage order taken verbatim from TOML/YAML/JSON files
//! - unknown or misconfigured stages failing startup
//! - invalid values rejected before any stage is resolved

use ablage::AblageError;
use ablage::core::config::PipelineConfig;
use ablage::core::pipeline::Pipeline;
use ablage::plugins::StageRegistry;
use ablage::storage::{MemoryBlobStore, MemoryDocumentStore};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn start(config: PipelineConfig) -> ablage::Result<Arc<Pipeline>> {
    Pipeline::initialize(
        config,
        &StageRegistry::with_builtins(),
        Arc::new(MemoryDocumentStore::new()),
        Arc::new(MemoryBlobStore::new()),
    )
}

#[test]
fn test_toml_stage_order_is_kept() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "ablage.toml",
        r#"
stages = ["text-extraction", "search-vector", "language-detection"]

[pool]
workers = 4
"#,
    );

    let config = PipelineConfig::from_file(&path).unwrap();
    let pipeline = start(config).unwrap();

    assert_eq!(
        pipeline.stage_names(),
        vec!["text-extraction", "search-vector", "language-detection"]
    );
    assert_eq!(pipeline.config().pool.workers, 4);
}

#[test]
fn test_yaml_config_starts_pipeline() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "ablage.yaml",
        r#"
stages:
  - text-extraction
  - cloud-ocr
ocr:
  endpoint: https://ocr.example.com
  max_polls: 5
storage:
  backend: s3
  bucket: tenant-docs
"#,
    );

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.ocr.max_polls, 5);
    assert_eq!(config.storage.bucket.as_deref(), Some("tenant-docs"));

    let pipeline = start(config).unwrap();
    assert_eq!(pipeline.stage_names(), vec!["text-extraction", "cloud-ocr"]);
}

#[test]
fn test_json_config_with_defaults() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ablage.json", r#"{ "search": { "title_weight": "B" } }"#);

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.search.title_weight, "B");
    assert_eq!(config.stages, PipelineConfig::default().stages);
}

#[test]
fn test_unknown_stage_in_file_fails_startup() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "ablage.toml", r#"stages = ["text-extraction", "virus-scan"]"#);

    let config = PipelineConfig::from_file(&path).unwrap();
    let err = start(config).unwrap_err();

    assert!(err.is_fatal_configuration());
    assert!(err.to_string().contains("virus-scan"));
}

#[test]
fn test_enabled_thumbnails_without_secret_fail_startup() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "ablage.toml",
        r#"
stages = ["thumbnail"]

[thumbnail]
enabled = true
service_url = "https://render.example.com"
signing_secret_env = "ABLAGE_CONFIG_LOADING_TEST_UNSET_SECRET"
"#,
    );

    let config = PipelineConfig::from_file(&path).unwrap();
    let err = start(config).unwrap_err();

    assert!(matches!(err, AblageError::Configuration { .. }));
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = TempDir::new().unwrap();

    let zero_workers = write(&dir, "workers.toml", "[pool]\nworkers = 0\n");
    assert!(PipelineConfig::from_file(&zero_workers).unwrap_err().is_fatal_configuration());

    let bad_weight = write(&dir, "weight.yaml", "search:\n  content_weight: E\n");
    assert!(PipelineConfig::from_file(&bad_weight).is_err());

    let wrong_type = write(&dir, "type.json", r#"{ "stages": "text-extraction" }"#);
    assert!(matches!(
        PipelineConfig::from_file(&wrong_type),
        Err(AblageError::Configuration { .. })
    ));
}

#[test]
fn test_missing_file_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let err = PipelineConfig::from_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.is_fatal_configuration());
}
