use crate::models::SegmentId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("file name does not carry a `<label>_<year>_<month>_<day>` date: {0}")]
    InvalidDocumentDate(String),

    #[error("invalid segmentation config: {0}")]
    InvalidSegmentConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding failed: {0}")]
    Embedding(#[from] ModelError),
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("segment not found: {0}")]
    NotFound(SegmentId),

    #[error("query vector has {actual} dimensions, index holds {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("index not built yet: {0}")]
    NotReady(String),
}

/// Failures of the external embedding and language-model calls.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: String,
        status: u16,
        body: String,
    },

    #[error("{service} returned an unusable response: {details}")]
    InvalidResponse { service: String, details: String },
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("query is empty")]
    EmptyQuery,
}
