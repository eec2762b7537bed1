//! Configuration loading and management.
//!
//! The pipeline is configured from a single [`PipelineConfig`], loaded from
//! TOML, YAML or JSON, or discovered as `ablage.toml` in the current directory
//! or one of its parents. Every section has defaults, so an empty file is valid.

use crate::types::{StorageBackend, Weight};
use crate::{AblageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up by [`PipelineConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "ablage.toml";

/// Main pipeline configuration.
///
/// # Example
///
/// ```rust
/// use ablage::core::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.pool.workers, 1);
/// assert_eq!(config.stages[0], "text-extraction");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Ordered stage identifiers. Order is execution order, so producers
    /// (language detection) must come before consumers (search vector).
    #[serde(default = "default_stages")]
    pub stages: Vec<String>,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub language_detection: LanguageDetectionConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
}

/// Worker pool settings for the pooled execution strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of documents processed concurrently. Kept at 1 by default since
    /// OCR and extraction hit shared downstream services.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Refuse a second submission for a document whose previous run is still in flight
    #[serde(default)]
    pub exclusive_documents: bool,

    /// Age after which an in-flight marker is considered stale
    #[serde(default = "default_in_flight_timeout")]
    pub in_flight_timeout_secs: u64,
}

/// Blob storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Root directory for the local backend
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Bucket name for object-store backends, used to build OCR references
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Cloud OCR service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Base URL of the OCR service (None = stage cannot reach a service)
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is not set
    #[serde(default = "default_ocr_key_env")]
    pub api_key_env: String,

    /// Fixed delay between two polls of a running job
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_polls")]
    pub max_polls: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_ocr_backends")]
    pub supported_backends: Vec<StorageBackend>,
}

/// Language detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageDetectionConfig {
    /// Language stored when the text's language is unknown or unsupported
    #[serde(default = "default_fallback_language")]
    pub fallback: String,

    /// Detections below this confidence fall back
    #[serde(default)]
    pub min_confidence: f64,
}

/// Search vector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Text search configuration used when no language was detected
    #[serde(default = "default_fallback_language")]
    pub fallback_config: String,

    #[serde(default = "default_title_weight")]
    pub title_weight: String,

    #[serde(default = "default_note_weight")]
    pub note_weight: String,

    #[serde(default = "default_content_weight")]
    pub content_weight: String,
}

/// Thumbnail rendering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Feature flag; when off the stage only logs a warning
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub service_url: Option<String>,

    #[serde(default)]
    pub signing_secret: Option<String>,

    /// Environment variable consulted when `signing_secret` is not set
    #[serde(default = "default_thumbnail_secret_env")]
    pub signing_secret_env: String,

    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// Public base URL the rendering service downloads originals from
    #[serde(default)]
    pub download_base_url: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

pub(crate) fn default_stages() -> Vec<String> {
    [
        "text-extraction",
        "cloud-ocr",
        "language-detection",
        "search-vector",
        "thumbnail",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_workers() -> usize {
    1
}
fn default_in_flight_timeout() -> u64 {
    900
}
fn default_backend() -> StorageBackend {
    StorageBackend::Local
}
fn default_ocr_key_env() -> String {
    "ABLAGE_OCR_API_KEY".to_string()
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_max_polls() -> u32 {
    120
}
fn default_request_timeout() -> u64 {
    30
}
fn default_ocr_backends() -> Vec<StorageBackend> {
    vec![StorageBackend::S3, StorageBackend::Gcs]
}
fn default_fallback_language() -> String {
    "simple".to_string()
}
fn default_title_weight() -> String {
    "A".to_string()
}
fn default_note_weight() -> String {
    "B".to_string()
}
fn default_content_weight() -> String {
    "C".to_string()
}
fn default_thumbnail_secret_env() -> String {
    "ABLAGE_THUMBNAIL_SECRET".to_string()
}
fn default_token_ttl() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            pool: PoolConfig::default(),
            storage: StorageConfig::default(),
            ocr: OcrConfig::default(),
            language_detection: LanguageDetectionConfig::default(),
            search: SearchConfig::default(),
            thumbnail: ThumbnailConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            exclusive_documents: false,
            in_flight_timeout_secs: default_in_flight_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: None,
            bucket: None,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            api_key_env: default_ocr_key_env(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
            request_timeout_secs: default_request_timeout(),
            supported_backends: default_ocr_backends(),
        }
    }
}

impl Default for LanguageDetectionConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_language(),
            min_confidence: 0.0,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            fallback_config: default_fallback_language(),
            title_weight: default_title_weight(),
            note_weight: default_note_weight(),
            content_weight: default_content_weight(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            service_url: None,
            signing_secret: None,
            signing_secret_env: default_thumbnail_secret_env(),
            token_ttl_secs: default_token_ttl(),
            download_base_url: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl OcrConfig {
    /// API key from the config, else from the configured environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.is_empty())
    }
}

impl ThumbnailConfig {
    /// Signing secret from the config, else from the configured environment variable.
    pub fn resolve_signing_secret(&self) -> Option<String> {
        self.signing_secret
            .clone()
            .or_else(|| std::env::var(&self.signing_secret_env).ok())
            .filter(|s| !s.is_empty())
    }
}

impl SearchConfig {
    /// Parsed (title, note, content) weights.
    pub fn weights(&self) -> Result<(Weight, Weight, Weight)> {
        Ok((
            self.title_weight.parse()?,
            self.note_weight.parse()?,
            self.content_weight.parse()?,
        ))
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `AblageError::Configuration` if the file can't be read or is invalid TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        toml::from_str(&content).map_err(|e| {
            AblageError::configuration_with_source(format!("Invalid TOML in {}", path.as_ref().display()), e)
        })
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        serde_yaml_ng::from_str(&content).map_err(|e| {
            AblageError::configuration_with_source(format!("Invalid YAML in {}", path.as_ref().display()), e)
        })
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;

        serde_json::from_str(&content).map_err(|e| {
            AblageError::configuration_with_source(format!("Invalid JSON in {}", path.as_ref().display()), e)
        })
    }

    /// Load configuration, choosing the format from the file extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let config = match extension.as_str() {
            "toml" => Self::from_toml_file(path)?,
            "yaml" | "yml" => Self::from_yaml_file(path)?,
            "json" => Self::from_json_file(path)?,
            other => {
                return Err(AblageError::configuration(format!(
                    "Unsupported config format '{}' for {} (expected toml, yaml or json)",
                    other,
                    path.display()
                )));
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Discover `ablage.toml` in the current directory or its parents.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let mut current = std::env::current_dir().map_err(AblageError::Io)?;

        loop {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                let config = Self::from_toml_file(candidate)?;
                config.validate()?;
                return Ok(Some(config));
            }

            if let Some(parent) = current.parent() {
                current = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(None)
    }

    /// Check values serde can't express constraints for.
    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(AblageError::configuration("pool.workers must be at least 1"));
        }

        if let Some(blank) = self.stages.iter().position(|s| s.trim().is_empty()) {
            return Err(AblageError::configuration(format!(
                "stages[{}] is empty; every stage identifier must name a stage",
                blank
            )));
        }

        if self.ocr.poll_interval_ms == 0 || self.ocr.max_polls == 0 {
            return Err(AblageError::configuration(
                "ocr.poll_interval_ms and ocr.max_polls must be greater than zero",
            ));
        }

        self.search.weights()?;

        Ok(())
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        AblageError::configuration_with_source(format!("Failed to read config file {}", path.display()), e)
    })
}
