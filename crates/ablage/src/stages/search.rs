//! Search vector stage.
//!
//! Builds the weighted full-text vector for a document from its title, note
//! and extracted text. The text search configuration is the detected
//! language, or `search.fallback_config` when none was detected, so this stage
//! must run after language detection. The configuration also selects the
//! stopword list: stopwords take up a position but produce no lexeme.

use crate::core::config::PipelineConfig;
use crate::plugins::{Plugin, Stage, StageContext, StageOutcome};
use crate::stages::stopwords::stopwords_for;
use crate::types::{Document, DocumentUpdate, LexemePosition, SearchVector, Weight};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Highest position the search backend records; later occurrences share it.
const MAX_POSITION: u32 = 16_383;

/// One weighted input to a search vector.
#[derive(Debug, Clone, Copy)]
pub struct WeightedField<'a> {
    pub text: &'a str,
    pub weight: Weight,
}

/// Search-vector computation collaborator.
///
/// Deployments backed by a database with native text search implement this
/// over the database's own primitive.
#[async_trait]
pub trait SearchIndexer: Send + Sync {
    async fn vectorize(&self, config: &str, fields: &[WeightedField<'_>]) -> Result<SearchVector>;
}

/// Lowercased word tokens with sequential positions across all fields,
/// minus the stopwords of the configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct WeightedLexemeIndexer;

impl WeightedLexemeIndexer {
    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .map(|token| token.trim_matches('\''))
            .filter(|token| !token.is_empty())
            .map(str::to_lowercase)
    }

    pub fn build(config: &str, fields: &[WeightedField<'_>]) -> SearchVector {
        let mut vector = SearchVector::new(config);
        let stopwords = stopwords_for(config);
        let mut position = 0u32;

        for field in fields {
            for token in Self::tokens(field.text) {
                position = (position + 1).min(MAX_POSITION);
                if stopwords.is_some_and(|words| words.contains(&token)) {
                    continue;
                }
                let positions = vector.lexemes.entry(token).or_default();
                match positions.last_mut() {
                    Some(last) if last.position == position => {
                        last.weight = last.weight.min(field.weight);
                    }
                    _ => positions.push(LexemePosition {
                        position,
                        weight: field.weight,
                    }),
                }
            }
        }

        vector
    }
}

#[async_trait]
impl SearchIndexer for WeightedLexemeIndexer {
    async fn vectorize(&self, config: &str, fields: &[WeightedField<'_>]) -> Result<SearchVector> {
        Ok(Self::build(config, fields))
    }
}

/// Computes the document's search vector.
pub struct SearchVectorStage {
    indexer: Arc<dyn SearchIndexer>,
    fallback_config: String,
    weights: (Weight, Weight, Weight),
}

impl SearchVectorStage {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        Self::with_indexer(Arc::new(WeightedLexemeIndexer), config)
    }

    pub fn with_indexer(indexer: Arc<dyn SearchIndexer>, config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            indexer,
            fallback_config: config.search.fallback_config.clone(),
            weights: config.search.weights()?,
        })
    }

    pub(crate) fn from_config(config: &PipelineConfig) -> Result<Arc<dyn Stage>> {
        Ok(Arc::new(Self::new(config)?))
    }
}

impl Plugin for SearchVectorStage {
    fn name(&self) -> &str {
        "search-vector"
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

    fn description(&self) -> &str {
        "Builds the weighted full-text search vector"
    }
}

#[async_trait]
impl Stage for SearchVectorStage {
    async fn process(&self, document: &Document, force: bool, _ctx: &StageContext) -> Result<StageOutcome> {
        if !force && document.search_vector.as_ref().is_some_and(|v| !v.is_empty()) {
            return Ok(StageOutcome::skipped("search vector already computed"));
        }

        let config = document
            .language
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(self.fallback_config.as_str());

        let (title, note, content) = self.weights;
        let fields = [
            WeightedField {
                text: &document.title,
                weight: title,
            },
            WeightedField {
                text: document.note.as_deref().unwrap_or_default(),
                weight: note,
            },
            WeightedField {
                text: document.text.as_deref().unwrap_or_default(),
                weight: content,
            },
        ];

        let vector = self.indexer.vectorize(config, &fields).await?;
        tracing::debug!(document_id = %document.id, config, lexemes = vector.lexemes.len(), "Search vector computed");
        Ok(StageOutcome::Updated(DocumentUpdate::new().search_vector(vector)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBlobStore, MemoryDocumentStore};
    use crate::types::BlobRef;

    fn ctx() -> StageContext {
        StageContext::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(PipelineConfig::default()),
        )
    }

    async fn vector_of(document: &Document, force: bool) -> Option<SearchVector> {
        let stage = SearchVectorStage::new(&PipelineConfig::default()).unwrap();
        match stage.process(document, force, &ctx()).await.unwrap() {
            StageOutcome::Updated(update) => update.search_vector,
            _ => None,
        }
    }

    #[test]
    fn test_tsvector_rendering() {
        let vector = WeightedLexemeIndexer::build(
            "simple",
            &[
                WeightedField {
                    text: "Hello World",
                    weight: Weight::A,
                },
                WeightedField {
                    text: "it's the world",
                    weight: Weight::C,
                },
            ],
        );
        assert_eq!(vector.to_string(), "'hello':1A 'it''s':3C 'the':4C 'world':2A,5C");
    }

    #[test]
    fn test_stopwords_follow_config() {
        let fields = [WeightedField {
            text: "Le chat et la souris",
            weight: Weight::C,
        }];

        let french = WeightedLexemeIndexer::build("french", &fields);
        assert_eq!(french.to_string(), "'chat':2C 'souris':5C");

        let simple = WeightedLexemeIndexer::build("simple", &fields);
        for word in ["le", "chat", "et", "la", "souris"] {
            assert!(simple.contains(word), "simple dropped {word}");
        }
    }

    #[tokio::test]
    async fn test_detected_language_drops_its_stopwords() {
        let mut document = Document::new("The annual report", "text/plain", BlobRef::new("r.txt"));
        document.text = Some("Der Bericht und die Zahlen".to_string());

        let simple = vector_of(&document, false).await.unwrap();
        assert!(simple.contains("the"));
        assert!(simple.contains("und"));

        document.language = Some("german".to_string());
        let german = vector_of(&document, false).await.unwrap();
        assert!(german.contains("the"));
        assert!(!german.contains("und"));
        assert!(!german.contains("die"));
        assert!(german.contains("bericht"));
        assert!(german.contains("zahlen"));
    }

    #[tokio::test]
    async fn test_weights_title_note_content() {
        let mut document = Document::new("Invoice", "text/plain", BlobRef::new("i.txt")).with_note("paid");
        document.text = Some("Invoice total".to_string());

        let vector = vector_of(&document, false).await.unwrap();
        assert_eq!(vector.best_weight("invoice"), Some(Weight::A));
        assert_eq!(vector.best_weight("paid"), Some(Weight::B));
        assert_eq!(vector.best_weight("total"), Some(Weight::C));
    }

    #[tokio::test]
    async fn test_config_follows_detected_language() {
        let mut document = Document::new("Rapport", "text/plain", BlobRef::new("r.txt"));
        assert_eq!(vector_of(&document, false).await.unwrap().config, "simple");

        document.language = Some("french".to_string());
        assert_eq!(vector_of(&document, false).await.unwrap().config, "french");
    }

    #[tokio::test]
    async fn test_skip_and_force() {
        let mut document = Document::new("Rapport", "text/plain", BlobRef::new("r.txt"));
        document.search_vector = Some(WeightedLexemeIndexer::build(
            "simple",
            &[WeightedField {
                text: "old",
                weight: Weight::A,
            }],
        ));

        assert!(vector_of(&document, false).await.is_none());
        let recomputed = vector_of(&document, true).await.unwrap();
        assert!(recomputed.contains("rapport"));
        assert!(!recomputed.contains("old"));
    }

    #[test]
    fn test_invalid_weight_rejected_at_construction() {
        let mut config = PipelineConfig::default();
        config.search.title_weight = "Z".to_string();
        assert!(SearchVectorStage::new(&config).is_err());
    }
}
