use crate::models::{SearchHit, Segment, SegmentId};
use crate::traits::SegmentIndex;
use crate::SearchError;
use async_trait::async_trait;
use std::collections::HashMap;

/// Exact search over every stored embedding.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    segments: Vec<Segment>,
    norms: Vec<f32>,
    positions: HashMap<SegmentId, usize>,
    dimensions: usize,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SegmentIndex for InMemoryIndex {
    async fn index(&mut self, segments: &[Segment]) -> Result<(), SearchError> {
        let dimensions = segments.first().map(|segment| segment.embedding.len()).unwrap_or(0);
        let mut positions = HashMap::with_capacity(segments.len());

        for (position, segment) in segments.iter().enumerate() {
            if segment.embedding.len() != dimensions || dimensions == 0 {
                return Err(SearchError::Request(format!(
                    "segment {} has {} dimensions, expected {}",
                    segment.id,
                    segment.embedding.len(),
                    dimensions
                )));
            }
            if positions.insert(segment.id, position).is_some() {
                return Err(SearchError::Request(format!(
                    "duplicate segment id {}",
                    segment.id
                )));
            }
        }

        self.norms = segments
            .iter()
            .map(|segment| segment.embedding.iter().map(|v| v * v).sum::<f32>().sqrt())
            .collect();
        self.segments = segments.to_vec();
        self.positions = positions;
        self.dimensions = dimensions;
        Ok(())
    }

    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if self.segments.is_empty() {
            return Err(SearchError::NotReady("in-memory index is empty".to_string()));
        }
        if query_vector.len() != self.dimensions {
            return Err(SearchError::DimensionMismatch {
                expected: self.dimensions,
                actual: query_vector.len(),
            });
        }

        let query_norm = query_vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        let mut scored: Vec<(usize, f32)> = self
            .segments
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(position, (segment, norm))| {
                let dot = segment
                    .embedding
                    .iter()
                    .zip(query_vector)
                    .map(|(a, b)| a * b)
                    .sum::<f32>();
                let denominator = norm * query_norm;
                let score = if denominator > 0.0 { dot / denominator } else { 0.0 };
                (position, score)
            })
            .collect();

        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| SearchHit {
                segment: self.segments[position].clone(),
                score,
            })
            .collect())
    }

    async fn get_by_id(&self, id: &SegmentId) -> Result<Segment, SearchError> {
        self.positions
            .get(id)
            .map(|position| self.segments[*position].clone())
            .ok_or(SearchError::NotFound(*id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use chrono::NaiveDate;

    fn segment(text: &str, embedder: &CharacterNgramEmbedder) -> Segment {
        Segment {
            id: SegmentId::generate(),
            text: text.to_string(),
            source_path: "/data/pdfs/BMF_2024_01_15.pdf".to_string(),
            source_filename: "BMF_2024_01_15.pdf".to_string(),
            page: "1".to_string(),
            document_date: NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date"),
            previous_id: None,
            next_id: None,
            embedding: embedder.embed_text(text),
        }
    }

    async fn corpus() -> InMemoryIndex {
        let embedder = CharacterNgramEmbedder::default();
        let segments = vec![
            segment("Die Grundzulage beträgt jährlich 175 Euro.", &embedder),
            segment("Leistungen aus einer Direktversicherung werden nachgelagert besteuert.", &embedder),
            segment("Der Solidaritätszuschlag beträgt 5,5 Prozent.", &embedder),
        ];
        let mut index = InMemoryIndex::new();
        index.index(&segments).await.expect("index builds");
        index
    }

    #[tokio::test]
    async fn own_embedding_is_the_top_match() {
        let index = corpus().await;
        for stored in &index.segments {
            let hits = index.nearest_neighbors(&stored.embedding, 1).await.unwrap();
            assert_eq!(hits[0].segment.id, stored.id);
            assert!((hits[0].score - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn results_are_ordered_and_bounded_by_corpus_size() {
        let index = corpus().await;
        let query = CharacterNgramEmbedder::default().embed_text("Grundzulage");
        let hits = index.nearest_neighbors(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let index = corpus().await;
        let missing = SegmentId::generate();
        let result = index.get_by_id(&missing).await;
        assert!(matches!(result, Err(SearchError::NotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn query_dimension_must_match() {
        let index = corpus().await;
        let result = index.nearest_neighbors(&[1.0, 0.0], 1).await;
        assert!(matches!(
            result,
            Err(SearchError::DimensionMismatch { expected: 128, actual: 2 })
        ));
    }

    #[tokio::test]
    async fn segments_without_embeddings_are_rejected() {
        let embedder = CharacterNgramEmbedder::default();
        let mut bare = segment("Ohne Vektor", &embedder);
        bare.embedding.clear();
        let mut index = InMemoryIndex::new();
        assert!(index.index(&[bare]).await.is_err());
    }
}
