//! Language detection stage.
//!
//! Classifies the extracted text and stores the language under the full name
//! the search backend uses for its text search configurations (`french`,
//! `german`, ...). Text that cannot be classified, or whose language the
//! backend has no configuration for, is stored as the configured fallback.
//! A document without text is left untouched so a later run can detect its
//! language once OCR or extraction has filled the text in.

use crate::core::config::{LanguageDetectionConfig, PipelineConfig};
use crate::plugins::{Plugin, Stage, StageContext, StageOutcome};
use crate::types::{Document, DocumentUpdate};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A detected language as an ISO 639-3 code plus confidence in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub code: String,
    pub confidence: f64,
}

/// Language classifier collaborator.
pub trait LanguageClassifier: Send + Sync {
    fn detect(&self, text: &str) -> Option<Detection>;
}

/// Classifier backed by `whatlang`.
#[cfg(feature = "language-detection")]
#[derive(Debug, Default, Clone, Copy)]
pub struct WhatlangClassifier;

#[cfg(feature = "language-detection")]
impl LanguageClassifier for WhatlangClassifier {
    fn detect(&self, text: &str) -> Option<Detection> {
        whatlang::detect(text).map(|info| Detection {
            code: info.lang().code().to_string(),
            confidence: info.confidence(),
        })
    }
}

/// Classifier used when no detection library is compiled in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoClassifier;

impl LanguageClassifier for NoClassifier {
    fn detect(&self, _text: &str) -> Option<Detection> {
        None
    }
}

/// Map an ISO 639-3 code to the search backend's configuration name.
pub fn full_language_name(code: &str) -> Option<&'static str> {
    let name = match code {
        "ara" => "arabic",
        "cat" => "catalan",
        "dan" => "danish",
        "deu" => "german",
        "ell" => "greek",
        "eng" => "english",
        "fin" => "finnish",
        "fra" => "french",
        "hin" => "hindi",
        "hun" => "hungarian",
        "hye" => "armenian",
        "ind" => "indonesian",
        "ita" => "italian",
        "lit" => "lithuanian",
        "nep" => "nepali",
        "nld" => "dutch",
        "nob" => "norwegian",
        "por" => "portuguese",
        "ron" => "romanian",
        "rus" => "russian",
        "spa" => "spanish",
        "srp" => "serbian",
        "swe" => "swedish",
        "tam" => "tamil",
        "tur" => "turkish",
        "yid" => "yiddish",
        _ => return None,
    };
    Some(name)
}

/// Stores the language of the extracted text.
pub struct LanguageDetectionStage {
    classifier: Arc<dyn LanguageClassifier>,
    fallback: String,
    min_confidence: f64,
}

impl LanguageDetectionStage {
    pub fn new(config: &LanguageDetectionConfig) -> Self {
        Self::with_classifier(default_classifier(), config)
    }

    pub fn with_classifier(classifier: Arc<dyn LanguageClassifier>, config: &LanguageDetectionConfig) -> Self {
        Self {
            classifier,
            fallback: config.fallback.clone(),
            min_confidence: config.min_confidence,
        }
    }

    pub(crate) fn from_config(config: &PipelineConfig) -> Result<Arc<dyn Stage>> {
        Ok(Arc::new(Self::new(&config.language_detection)))
    }

    fn classify(&self, text: &str) -> &str {
        match self.classifier.detect(text) {
            Some(detection) if detection.confidence >= self.min_confidence => {
                full_language_name(&detection.code).unwrap_or(self.fallback.as_str())
            }
            Some(detection) => {
                tracing::debug!(
                    code = %detection.code,
                    confidence = detection.confidence,
                    "Language detection below confidence threshold"
                );
                self.fallback.as_str()
            }
            None => self.fallback.as_str(),
        }
    }
}

#[cfg(feature = "language-detection")]
fn default_classifier() -> Arc<dyn LanguageClassifier> {
    Arc::new(WhatlangClassifier)
}

#[cfg(not(feature = "language-detection"))]
fn default_classifier() -> Arc<dyn LanguageClassifier> {
    Arc::new(NoClassifier)
}

impl Plugin for LanguageDetectionStage {
    fn name(&self) -> &str {
        "language-detection"
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Stage for LanguageDetectionStage {
    async fn process(&self, document: &Document, force: bool, _ctx: &StageContext) -> Result<StageOutcome> {
        if !force && document.language.as_deref().is_some_and(|l| !l.is_empty()) {
            return Ok(StageOutcome::skipped("language already set"));
        }

        let Some(text) = document.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(StageOutcome::skipped("no text to classify"));
        };

        let language = self.classify(text);
        Ok(StageOutcome::Updated(DocumentUpdate::new().language(language)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use crate::types::BlobRef;

    struct Fixed(Option<Detection>);

    impl LanguageClassifier for Fixed {
        fn detect(&self, _: &str) -> Option<Detection> {
            self.0.clone()
        }
    }

    fn fixed(code: &str, confidence: f64) -> Arc<dyn LanguageClassifier> {
        Arc::new(Fixed(Some(Detection {
            code: code.to_string(),
            confidence,
        })))
    }

    fn ctx() -> StageContext {
        StageContext::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(PipelineConfig::default()),
        )
    }

    fn with_text(text: &str) -> Document {
        let mut document = Document::new("d", "text/plain", BlobRef::new("d.txt"));
        document.text = Some(text.to_string());
        document
    }

    async fn detected(stage: &LanguageDetectionStage, document: &Document, force: bool) -> Option<String> {
        match stage.process(document, force, &ctx()).await.unwrap() {
            StageOutcome::Updated(update) => update.language,
            _ => None,
        }
    }

    #[test]
    fn test_code_mapping() {
        assert_eq!(full_language_name("fra"), Some("french"));
        assert_eq!(full_language_name("deu"), Some("german"));
        assert_eq!(full_language_name("xyz"), None);
    }

    #[tokio::test]
    async fn test_unmapped_code_falls_back() {
        let stage = LanguageDetectionStage::with_classifier(fixed("jpn", 1.0), &LanguageDetectionConfig::default());
        assert_eq!(detected(&stage, &with_text("テキスト"), false).await.as_deref(), Some("simple"));
    }

    #[tokio::test]
    async fn test_low_confidence_falls_back() {
        let config = LanguageDetectionConfig {
            min_confidence: 0.9,
            ..Default::default()
        };
        let stage = LanguageDetectionStage::with_classifier(fixed("fra", 0.2), &config);
        assert_eq!(detected(&stage, &with_text("le"), false).await.as_deref(), Some("simple"));
    }

    #[tokio::test]
    async fn test_missing_text_is_skipped() {
        let stage = LanguageDetectionStage::with_classifier(fixed("fra", 1.0), &LanguageDetectionConfig::default());
        let document = Document::new("d", "image/png", BlobRef::new("d.png"));
        assert!(matches!(
            stage.process(&document, false, &ctx()).await.unwrap(),
            StageOutcome::Skipped { .. }
        ));
        assert!(matches!(
            stage.process(&with_text("  \n\t"), true, &ctx()).await.unwrap(),
            StageOutcome::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_detects_once_text_arrives() {
        let stage = LanguageDetectionStage::with_classifier(fixed("fra", 1.0), &LanguageDetectionConfig::default());
        let mut document = Document::new("scan", "image/png", BlobRef::new("scan.png"));
        assert_eq!(detected(&stage, &document, false).await, None);
        assert_eq!(document.language, None);

        document.text = Some("Facture numéro 42".to_string());
        assert_eq!(detected(&stage, &document, false).await.as_deref(), Some("french"));
    }

    #[tokio::test]
    async fn test_skip_and_force() {
        let stage = LanguageDetectionStage::with_classifier(fixed("fra", 1.0), &LanguageDetectionConfig::default());
        let mut document = with_text("Bonjour");
        document.language = Some("german".to_string());

        assert!(matches!(
            stage.process(&document, false, &ctx()).await.unwrap(),
            StageOutcome::Skipped { .. }
        ));
        assert_eq!(detected(&stage, &document, true).await.as_deref(), Some("french"));
    }

    #[cfg(feature = "language-detection")]
    #[tokio::test]
    async fn test_whatlang_detects_french() {
        let stage = LanguageDetectionStage::new(&LanguageDetectionConfig::default());
        let document = with_text(
            "Bonjour le monde, nous sommes très heureux de vous présenter ce document en français aujourd'hui.",
        );
        assert_eq!(detected(&stage, &document, false).await.as_deref(), Some("french"));
    }
}
