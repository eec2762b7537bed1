//! Built-in processing stages.
//!
//! | key | stage | skips when (without `force`) |
//! |---|---|---|
//! | `text-extraction` | [`TextExtractionStage`] | text present |
//! | `cloud-ocr` | [`OcrStage`] | text present and not blank |
//! | `language-detection` | [`LanguageDetectionStage`] | language set; always when text is blank |
//! | `search-vector` | [`SearchVectorStage`] | search vector present |
//! | `thumbnail` | [`ThumbnailStage`] | disabled, or thumbnail present |

pub mod language;
pub mod ocr;
pub mod search;
pub mod stopwords;
pub mod text_extraction;
pub mod thumbnail;

pub use language::{LanguageClassifier, LanguageDetectionStage};
pub use ocr::{OcrService, OcrStage};
pub use search::{SearchIndexer, SearchVectorStage, WeightedLexemeIndexer};
pub use text_extraction::{DefaultParser, DocumentParser, TextExtractionStage};
pub use thumbnail::{ThumbnailRenderer, ThumbnailStage, TokenSigner};

use crate::plugins::StageRegistry;

/// Register every built-in stage under its key.
pub fn register_builtins(registry: &mut StageRegistry) {
    registry.insert_builtin("text-extraction", TextExtractionStage::from_config);
    registry.insert_builtin("cloud-ocr", OcrStage::from_config);
    registry.insert_builtin("language-detection", LanguageDetectionStage::from_config);
    registry.insert_builtin("search-vector", SearchVectorStage::from_config);
    registry.insert_builtin("thumbnail", ThumbnailStage::from_config);
}
