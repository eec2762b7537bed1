//! Error types for the processing pipeline.
//!
//! All fallible operations return [`AblageError`]. The variants follow the
//! pipeline's failure taxonomy:
//!
//! - `Configuration` - fatal, raised while the stage set is being built at
//!   process startup (unknown stage identifier, invalid config file)
//! - `UnsupportedStorage` - a stage cannot run against the active storage
//!   backend; recorded by the orchestrator, the chain continues
//! - `ExternalService` - network, timeout or non-2xx responses from an
//!   external collaborator; never retried by the orchestrator
//! - `Io` - file system errors, which always bubble up unchanged
//!
//! Stage errors never propagate past the orchestrator's per-stage boundary.
//! Orchestrator-level errors (missing document, pool closed) reach the caller.
use crate::types::{DocumentId, StorageBackend};
use thiserror::Error;

/// Result type alias using `AblageError`.
pub type Result<T> = std::result::Result<T, AblageError>;

/// Main error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum AblageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parsing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("OCR error: {message}")]
    Ocr {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Stage '{plugin}' does not support storage backend '{backend}' (supported: {})", format_backends(.supported))]
    UnsupportedStorage {
        plugin: String,
        backend: StorageBackend,
        supported: Vec<StorageBackend>,
    },

    #[error("External service '{service}' failed{}: {message}", format_status(.status))]
    ExternalService {
        service: String,
        message: String,
        status: Option<u16>,
    },

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Plugin error in '{plugin_name}': {message}")]
    Plugin { message: String, plugin_name: String },

    #[error("Submission error: {0}")]
    Submission(String),

    #[error("{0}")]
    Other(String),
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

fn format_backends(backends: &[StorageBackend]) -> String {
    backends.iter().map(|b| b.as_str()).collect::<Vec<_>>().join(", ")
}

impl From<serde_json::Error> for AblageError {
    fn from(err: serde_json::Error) -> Self {
        AblageError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<toml::de::Error> for AblageError {
    fn from(err: toml::de::Error) -> Self {
        AblageError::Configuration {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<serde_yaml_ng::Error> for AblageError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        AblageError::Configuration {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for AblageError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|url| url.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());
        AblageError::ExternalService {
            service,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl AblageError {
    error_constructor!(parsing, Parsing);
    error_constructor!(ocr, Ocr);
    error_constructor!(validation, Validation);
    error_constructor!(serialization, Serialization);
    error_constructor!(configuration, Configuration);

    /// Create an external service error.
    pub fn external<S: Into<String>, M: Into<String>>(service: S, message: M, status: Option<u16>) -> Self {
        Self::ExternalService {
            service: service.into(),
            message: message.into(),
            status,
        }
    }

    /// Create a plugin error attributed to a named stage.
    pub fn plugin<N: Into<String>, M: Into<String>>(plugin_name: N, message: M) -> Self {
        Self::Plugin {
            plugin_name: plugin_name.into(),
            message: message.into(),
        }
    }

    /// Whether re-running the same document later could plausibly succeed.
    ///
    /// Only failures of external collaborators and I/O qualify. Reprocessing is
    /// the retry mechanism; nothing in the pipeline retries automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, AblageError::ExternalService { .. } | AblageError::Io(_))
    }

    /// Whether this error must stop the process from serving processing requests.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(self, AblageError::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "blob not found");
        let err: AblageError = io_err.into();
        assert!(matches!(err, AblageError::Io(_)));
        assert!(err.to_string().contains("IO error"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_parsing_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::InvalidData, "bad data");
        let err = AblageError::parsing_with_source("invalid pdf", source);
        assert_eq!(err.to_string(), "Parsing error: invalid pdf");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_configuration_error() {
        let err = AblageError::configuration("unknown stage 'foo'");
        assert_eq!(err.to_string(), "Configuration error: unknown stage 'foo'");
        assert!(err.is_fatal_configuration());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_unsupported_storage_message() {
        let err = AblageError::UnsupportedStorage {
            plugin: "cloud-ocr".to_string(),
            backend: StorageBackend::Local,
            supported: vec![StorageBackend::S3, StorageBackend::Gcs],
        };
        assert_eq!(
            err.to_string(),
            "Stage 'cloud-ocr' does not support storage backend 'local' (supported: s3, gcs)"
        );
    }

    #[test]
    fn test_external_service_message() {
        let with_status = AblageError::external("ocr.example.com", "job rejected", Some(503));
        assert_eq!(
            with_status.to_string(),
            "External service 'ocr.example.com' failed with status 503: job rejected"
        );
        assert!(with_status.is_transient());

        let without_status = AblageError::external("renderer", "timed out", None);
        assert_eq!(without_status.to_string(), "External service 'renderer' failed: timed out");
    }

    #[test]
    fn test_plugin_error() {
        let err = AblageError::plugin("text-extraction", "parser crashed");
        assert_eq!(err.to_string(), "Plugin error in 'text-extraction': parser crashed");
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: AblageError = json_err.into();
        assert!(matches!(err, AblageError::Serialization { .. }));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("stages = [").unwrap_err();
        let err: AblageError = toml_err.into();
        assert!(err.is_fatal_configuration());
    }
}
