pub mod context;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod segmenter;
pub mod store;
pub mod stores;
pub mod traits;

pub use context::ContextExpander;
pub use embeddings::{
    cosine_similarity, l2_normalize, CharacterNgramEmbedder, Embedder, HttpEmbedder,
    CHARACTER_NGRAM_MODEL, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{IngestError, ModelError, RagError, SearchError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, PdfExtractor};
pub use generation::{LanguageModel, OpenAiChatModel};
pub use ingest::{
    build_corpus, digest_file, discover_pdf_files, document_date_from_filename, CorpusBuild,
    SkippedPdf,
};
pub use models::{
    ChainLink, ChainViolation, DocumentManifest, EmbeddingOptions, GenerationOptions, RagConfig,
    RetrievalOptions, SearchHit, Segment, SegmentId, SegmentStore, SegmentationOptions,
    NO_ANSWER_MARKER,
};
pub use orchestrator::{Answer, RagPipeline};
pub use segmenter::{normalize_page, verify_segment_links, DocumentSource, Segmenter};
pub use store::{embed_segments, SegmentFile};
pub use stores::{InMemoryIndex, QdrantIndex};
pub use traits::SegmentIndex;
