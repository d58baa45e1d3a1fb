use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const NO_ANSWER_MARKER: &str = "Hoppla";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentId(Uuid);

impl SegmentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for SegmentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One retrievable piece of a source document.
///
/// Segments of a document form a doubly-linked chain through `previous_id`
/// and `next_id`. Links are ids into the same build, never references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub text: String,
    pub source_path: String,
    pub source_filename: String,
    pub page: String,
    pub document_date: NaiveDate,
    pub previous_id: Option<SegmentId>,
    pub next_id: Option<SegmentId>,
    /// Empty until the embedding store attaches a vector.
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Segment {
    pub fn document_date_label(&self) -> String {
        self.document_date.format("%d.%m.%Y").to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub segment: Segment,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainLink {
    Previous,
    Next,
}

/// A chain reference that does not resolve inside its build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainViolation {
    pub segment_id: SegmentId,
    pub link: ChainLink,
    pub missing_id: SegmentId,
    pub page: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentManifest {
    pub filename: String,
    pub source_path: String,
    pub document_date: NaiveDate,
    pub checksum: String,
    pub page_count: usize,
    pub segment_count: usize,
}

/// Persisted corpus: every segment with its embedding plus build metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentStore {
    pub embedding_model: String,
    pub normalized: bool,
    pub dimensions: usize,
    pub built_at: DateTime<Utc>,
    pub documents: Vec<DocumentManifest>,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone)]
pub struct SegmentationOptions {
    pub min_chars_per_segment: usize,
    pub heading_max_chars: usize,
    pub heading_regex: &'static str,
    pub page_marker: &'static str,
}

impl Default for SegmentationOptions {
    fn default() -> Self {
        Self {
            min_chars_per_segment: 5,
            heading_max_chars: 100,
            heading_regex: r"^[0-9A-Za-z]+[.)](\s|$)",
            page_marker: "Seite",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingOptions {
    pub model: String,
    pub normalize: bool,
    pub batch_size: usize,
}

impl Default for EmbeddingOptions {
    fn default() -> Self {
        Self {
            model: "danielheinz/e5-base-sts-en-de".to_string(),
            normalize: true,
            batch_size: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub document_limit: usize,
    pub extra_context: bool,
    pub max_retries: usize,
    pub doc_limit_increment: usize,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            document_limit: 5,
            extra_context: true,
            max_retries: 2,
            doc_limit_increment: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            max_tokens: 4_096,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RagConfig {
    pub segmentation: SegmentationOptions,
    pub embedding: EmbeddingOptions,
    pub retrieval: RetrievalOptions,
    pub generation: GenerationOptions,
}
