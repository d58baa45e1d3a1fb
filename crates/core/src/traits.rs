use crate::models::{SearchHit, Segment, SegmentId};
use crate::SearchError;
use async_trait::async_trait;

/// Nearest-neighbour search over segment embeddings plus lookup by id.
///
/// Context expansion and answering only ever see this contract, so the
/// in-memory and Qdrant backings are interchangeable.
#[async_trait]
pub trait SegmentIndex: Send + Sync {
    async fn index(&mut self, segments: &[Segment]) -> Result<(), SearchError>;

    /// The `k` closest segments by cosine similarity, best first.
    async fn nearest_neighbors(
        &self,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError>;

    async fn get_by_id(&self, id: &SegmentId) -> Result<Segment, SearchError>;
}
