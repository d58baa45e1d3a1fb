use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::models::{DocumentManifest, EmbeddingOptions, Segment, SegmentStore};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Attaches a vector to every segment, batch by batch.
pub async fn embed_segments<E>(
    embedder: &E,
    segments: &mut [Segment],
    batch_size: usize,
) -> Result<(), IngestError>
where
    E: Embedder + ?Sized,
{
    let batch_size = batch_size.max(1);
    let batches = segments.len().div_ceil(batch_size);

    for (batch_no, batch) in segments.chunks_mut(batch_size).enumerate() {
        debug!(batch = batch_no + 1, of = batches, "embedding batch");
        let texts: Vec<String> = batch.iter().map(|segment| segment.text.clone()).collect();
        let vectors = embedder.embed_batch(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(IngestError::InvalidArgument(format!(
                "embedder returned {} vectors for {} segments",
                vectors.len(),
                batch.len()
            )));
        }
        for (segment, vector) in batch.iter_mut().zip(vectors) {
            segment.embedding = vector;
        }
    }

    Ok(())
}

impl SegmentStore {
    /// Wraps embedded segments, rejecting empty vectors, mixed dimensions and
    /// duplicate ids.
    pub fn new(
        options: &EmbeddingOptions,
        documents: Vec<DocumentManifest>,
        segments: Vec<Segment>,
    ) -> Result<Self, IngestError> {
        let dimensions = validate_segments(&segments)?;
        Ok(Self {
            embedding_model: options.model.clone(),
            normalized: options.normalize,
            dimensions,
            built_at: Utc::now(),
            documents,
            segments,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        info!(path = %path.display(), segments = self.segments.len(), "segment store written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IngestError> {
        let store: SegmentStore = serde_json::from_slice(&fs::read(path)?)?;
        let dimensions = validate_segments(&store.segments)?;
        if dimensions != store.dimensions {
            return Err(IngestError::InvalidArgument(format!(
                "store declares {} dimensions, segments carry {}",
                store.dimensions, dimensions
            )));
        }
        info!(
            path = %path.display(),
            segments = store.segments.len(),
            model = %store.embedding_model,
            "segment store loaded"
        );
        Ok(store)
    }
}

fn validate_segments(segments: &[Segment]) -> Result<usize, IngestError> {
    let dimensions = segments.first().map(|segment| segment.embedding.len()).unwrap_or(0);
    let mut seen = HashSet::with_capacity(segments.len());

    for segment in segments {
        if segment.embedding.is_empty() || segment.embedding.len() != dimensions {
            return Err(IngestError::InvalidArgument(format!(
                "segment {} has {} dimensions, expected {}",
                segment.id,
                segment.embedding.len(),
                dimensions
            )));
        }
        if !seen.insert(segment.id) {
            return Err(IngestError::InvalidArgument(format!(
                "duplicate segment id {}",
                segment.id
            )));
        }
    }

    Ok(dimensions)
}

/// Output of the segmentation step: chained segments without embeddings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SegmentFile {
    pub documents: Vec<DocumentManifest>,
    pub segments: Vec<Segment>,
}

impl SegmentFile {
    pub fn save(&self, path: &Path) -> Result<(), IngestError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec(self)?)?;
        info!(path = %path.display(), segments = self.segments.len(), "segments written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, IngestError> {
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }
}
