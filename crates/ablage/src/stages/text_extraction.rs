//! Text extraction stage.
//!
//! Reads the original bytes from the blob store and hands them to a
//! [`DocumentParser`]. The built-in [`DefaultParser`] understands plain-text
//! formats and, with the `pdf` feature, PDF via `lopdf`.

use crate::core::config::PipelineConfig;
use crate::plugins::{Plugin, Stage, StageContext, StageOutcome};
use crate::types::{Document, DocumentUpdate};
use crate::{AblageError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Output of a [`DocumentParser`].
#[derive(Debug, Default)]
pub struct ParsedDocument {
    pub text: Option<String>,
    pub page_count: Option<u32>,
    pub metadata: BTreeMap<String, String>,
    /// Set when the page count was read but the text layer could not be.
    pub text_error: Option<AblageError>,
}

/// Document-parsing collaborator.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Whether this parser handles `mime_type` (parameters already stripped).
    fn supports(&self, mime_type: &str) -> bool;

    async fn parse(&self, bytes: Vec<u8>, mime_type: &str) -> Result<ParsedDocument>;
}

const TEXT_LIKE_TYPES: &[&str] = &[
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/csv",
];

/// Parser for text-like formats and PDF.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultParser;

impl DefaultParser {
    fn is_text_like(mime_type: &str) -> bool {
        mime_type.starts_with("text/") || mime_type.ends_with("+xml") || mime_type.ends_with("+json")
            || TEXT_LIKE_TYPES.contains(&mime_type)
    }

    fn parse_text(bytes: &[u8]) -> ParsedDocument {
        let raw = String::from_utf8_lossy(bytes);
        let pages = raw.split('\x0c').filter(|page| !page.trim().is_empty()).count().max(1);

        let mut metadata = BTreeMap::new();
        metadata.insert("encoding".to_string(), "utf-8".to_string());

        ParsedDocument {
            text: Some(normalize_whitespace(&raw)),
            page_count: Some(pages as u32),
            metadata,
            text_error: None,
        }
    }

    #[cfg(feature = "pdf")]
    fn parse_pdf(bytes: &[u8]) -> Result<ParsedDocument> {
        let pdf = lopdf::Document::load_mem(bytes)
            .map_err(|e| AblageError::parsing_with_source("Failed to load PDF", e))?;

        let page_numbers: Vec<u32> = pdf.get_pages().keys().copied().collect();
        let mut metadata = BTreeMap::new();
        metadata.insert("pdf_version".to_string(), pdf.version.clone());

        let mut parsed = ParsedDocument {
            text: None,
            page_count: Some(page_numbers.len() as u32),
            metadata,
            text_error: None,
        };

        match pdf.extract_text(&page_numbers) {
            Ok(text) => parsed.text = Some(normalize_whitespace(&text)),
            Err(e) => parsed.text_error = Some(AblageError::parsing_with_source("Failed to read PDF text layer", e)),
        }

        Ok(parsed)
    }
}

#[async_trait]
impl DocumentParser for DefaultParser {
    fn supports(&self, mime_type: &str) -> bool {
        Self::is_text_like(mime_type) || (cfg!(feature = "pdf") && mime_type == "application/pdf")
    }

    async fn parse(&self, bytes: Vec<u8>, mime_type: &str) -> Result<ParsedDocument> {
        if Self::is_text_like(mime_type) {
            return Ok(Self::parse_text(&bytes));
        }

        #[cfg(feature = "pdf")]
        if mime_type == "application/pdf" {
            return tokio::task::spawn_blocking(move || Self::parse_pdf(&bytes))
                .await
                .map_err(|e| AblageError::parsing(format!("PDF parsing task failed: {}", e)))?;
        }

        Err(AblageError::parsing(format!("Unsupported MIME type for text extraction: {}", mime_type)))
    }
}

/// Collapse horizontal whitespace, drop trailing spaces and blank-line runs.
pub(crate) fn normalize_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;

    for line in raw.split(['\n', '\x0c']) {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            blank_run += 1;
            continue;
        }

        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(&words.join(" "));
        blank_run = 0;
    }

    out
}

/// Strip parameters (`; charset=...`) and lowercase.
pub(crate) fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Extracts plain text and page count from the original bytes.
pub struct TextExtractionStage {
    parser: Arc<dyn DocumentParser>,
}

impl TextExtractionStage {
    pub fn new() -> Self {
        Self::with_parser(Arc::new(DefaultParser))
    }

    pub fn with_parser(parser: Arc<dyn DocumentParser>) -> Self {
        Self { parser }
    }

    pub(crate) fn from_config(_config: &PipelineConfig) -> Result<Arc<dyn Stage>> {
        Ok(Arc::new(Self::new()))
    }
}

impl Default for TextExtractionStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for TextExtractionStage {
    fn name(&self) -> &str {
        "text-extraction"
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
        "Extracts plain text and page count from the original document"
    }
}

#[async_trait]
impl Stage for TextExtractionStage {
    async fn process(&self, document: &Document, force: bool, ctx: &StageContext) -> Result<StageOutcome> {
        if !force && document.has_text() {
            return Ok(StageOutcome::skipped("text already extracted"));
        }

        let mime_type = essence(&document.mime_type);
        if !self.parser.supports(&mime_type) {
            return Err(AblageError::parsing(format!(
                "Unsupported MIME type for text extraction: {}",
                mime_type
            )));
        }

        let bytes = ctx.blobs.read(&document.content).await?;
        let size = bytes.len();
        let parsed = self.parser.parse(bytes, &mime_type).await?;

        tracing::debug!(
            document_id = %document.id,
            mime_type = %mime_type,
            size_bytes = size,
            pages = ?parsed.page_count,
            "Parsed document"
        );

        let mut update = DocumentUpdate::new();
        if let Some(pages) = parsed.page_count {
            update = update.page_count(pages);
        }
        if let Some(text) = parsed.text.filter(|t| !t.trim().is_empty()) {
            update = update.text(text);
        }

        match parsed.text_error {
            Some(error) => Ok(StageOutcome::Partial { update, error }),
            None if update.is_empty() => Ok(StageOutcome::skipped("parser found no text")),
            None => Ok(StageOutcome::Updated(update)),
        }
    }
}
