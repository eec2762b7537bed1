use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::AblageError;

/// Stable identity of a document for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DocumentId {
    type Err = AblageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| AblageError::validation_with_source(format!("Invalid document id '{}'", s), e))
    }
}

/// Blob storage backend kinds a deployment can be configured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Local filesystem
    Local,
    /// Process memory (tests, one-shot CLI runs)
    Memory,
    /// Amazon S3 or an S3-compatible object store
    S3,
    /// Google Cloud Storage
    Gcs,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Local => "local",
            StorageBackend::Memory => "memory",
            StorageBackend::S3 => "s3",
            StorageBackend::Gcs => "gcs",
        }
    }
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageBackend {
    type Err = AblageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "filesystem" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            "s3" => Ok(StorageBackend::S3),
            "gcs" => Ok(StorageBackend::Gcs),
            other => Err(AblageError::configuration(format!(
                "Unknown storage backend '{}' (expected one of: local, memory, s3, gcs)",
                other
            ))),
        }
    }
}

/// Key of a byte stream in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document record as seen by the processing core.
///
/// Only the processing-relevant subset of the record is modelled. The original
/// bytes behind `content` are never rewritten by processing; the derived fields
/// (`text`, `page_count`, `language`, `search_vector`, `thumbnail`) are written by
/// stages through [`DocumentUpdate`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub organization_id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub note: Option<String>,
    /// MIME type recorded at upload time
    pub mime_type: String,
    pub content: BlobRef,

    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub search_vector: Option<SearchVector>,
    #[serde(default)]
    pub thumbnail: Option<BlobRef>,
}

impl Document {
    /// Create a document with empty derived fields.
    pub fn new(title: impl Into<String>, mime_type: impl Into<String>, content: BlobRef) -> Self {
        Self {
            id: DocumentId::new(),
            organization_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            title: title.into(),
            note: None,
            mime_type: mime_type.into(),
            content,
            text: None,
            page_count: None,
            language: None,
            search_vector: None,
            thumbnail: None,
        }
    }

    pub fn with_id(mut self, id: DocumentId) -> Self {
        self.id = id;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_owner(mut self, organization_id: Uuid, owner_id: Uuid) -> Self {
        self.organization_id = organization_id;
        self.owner_id = owner_id;
        self
    }

    /// Extracted text is stored and not empty.
    pub fn has_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Extracted text is stored and contains something other than whitespace.
    pub fn has_meaningful_text(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Rank weight of a lexeme, most important first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Weight {
    A,
    B,
    C,
    D,
}

impl Weight {
    fn as_char(&self) -> char {
        match self {
            Weight::A => 'A',
            Weight::B => 'B',
            Weight::C => 'C',
            Weight::D => 'D',
        }
    }
}

impl FromStr for Weight {
    type Err = AblageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" | "a" => Ok(Weight::A),
            "B" | "b" => Ok(Weight::B),
            "C" | "c" => Ok(Weight::C),
            "D" | "d" => Ok(Weight::D),
            other => Err(AblageError::configuration(format!(
                "Invalid search weight '{}' (expected A, B, C or D)",
                other
            ))),
        }
    }
}

/// One occurrence of a lexeme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexemePosition {
    pub position: u32,
    pub weight: Weight,
}

/// Weighted lexeme vector used by the full-text search backend.
///
/// Renders in the `tsvector` text representation, e.g. `'bonjour':1A 'mond':2A,5C`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchVector {
    /// Text search configuration the vector was built with (e.g. `french`, `simple`)
    pub config: String,
    pub lexemes: BTreeMap<String, Vec<LexemePosition>>,
}

impl SearchVector {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            lexemes: BTreeMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lexemes.is_empty()
    }

    pub fn contains(&self, lexeme: &str) -> bool {
        self.lexemes.contains_key(lexeme)
    }

    /// Highest-ranked weight recorded for a lexeme.
    pub fn best_weight(&self, lexeme: &str) -> Option<Weight> {
        self.lexemes
            .get(lexeme)
            .and_then(|positions| positions.iter().map(|p| p.weight).min())
    }
}

impl fmt::Display for SearchVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (lexeme, positions) in &self.lexemes {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "'{}'", lexeme.replace('\'', "''"))?;
            for (i, pos) in positions.iter().enumerate() {
                let sep = if i == 0 { ':' } else { ',' };
                write!(f, "{}{}", sep, pos.position)?;
                if pos.weight != Weight::D {
                    write!(f, "{}", pos.weight.as_char())?;
                }
            }
        }
        Ok(())
    }
}

/// Derived fields computed by a stage.
///
/// Only the fields a stage actually computed are set; everything left as `None`
/// is untouched when the update is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_vector: Option<SearchVector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<BlobRef>,
}

impl DocumentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn search_vector(mut self, vector: SearchVector) -> Self {
        self.search_vector = Some(vector);
        self
    }

    pub fn thumbnail(mut self, thumbnail: BlobRef) -> Self {
        self.thumbnail = Some(thumbnail);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Names of the fields this update sets, in a fixed order.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.text.is_some() {
            names.push("text");
        }
        if self.page_count.is_some() {
            names.push("page_count");
        }
        if self.language.is_some() {
            names.push("language");
        }
        if self.search_vector.is_some() {
            names.push("search_vector");
        }
        if self.thumbnail.is_some() {
            names.push("thumbnail");
        }
        names
    }

    /// Write the set fields onto a document record.
    pub fn apply_to(&self, document: &mut Document) {
        if let Some(ref text) = self.text {
            document.text = Some(text.clone());
        }
        if let Some(page_count) = self.page_count {
            document.page_count = Some(page_count);
        }
        if let Some(ref language) = self.language {
            document.language = Some(language.clone());
        }
        if let Some(ref vector) = self.search_vector {
            document.search_vector = Some(vector.clone());
        }
        if let Some(ref thumbnail) = self.thumbnail {
            document.thumbnail = Some(thumbnail.clone());
        }
    }
}

/// Outcome of one stage in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageStatus {
    Applied { fields: Vec<String> },
    Skipped { reason: String },
    Partial { fields: Vec<String>, error: String },
    Failed { error: String },
}

impl StageStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, StageStatus::Failed { .. } | StageStatus::Partial { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    #[serde(flatten)]
    pub status: StageStatus,
    pub elapsed_ms: u64,
}

/// Per-run summary. Never persisted, only logged or handed back to callers
/// that choose to wait for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingReport {
    pub document_id: DocumentId,
    pub force: bool,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u64,
}

impl ProcessingReport {
    /// Stage names in the order they were invoked.
    pub fn stage_order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage.as_str()).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|s| s.status.is_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn status_of(&self, stage: &str) -> Option<&StageStatus> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.status)
    }
}
