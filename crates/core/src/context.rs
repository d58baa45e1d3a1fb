use crate::models::Segment;
use crate::traits::SegmentIndex;
use crate::SearchError;
use tracing::error;

const SEPARATOR: &str = "\n\n";

/// Widens a hit with the text of its chain neighbours.
pub struct ContextExpander<'a, I: SegmentIndex + ?Sized> {
    index: &'a I,
}

impl<'a, I: SegmentIndex + ?Sized> ContextExpander<'a, I> {
    pub fn new(index: &'a I) -> Self {
        Self { index }
    }

    /// Returns a copy whose text is `previous + text + next`, joined by blank
    /// lines. Missing sides at the chain ends are left out; a neighbour id
    /// the index cannot resolve is an error, not a silent truncation.
    pub async fn expand(&self, segment: &Segment) -> Result<Segment, SearchError> {
        let mut expanded = segment.clone();

        if let Some(previous_id) = &segment.previous_id {
            let previous = self.index.get_by_id(previous_id).await.inspect_err(|err| {
                error!(segment_id = %segment.id, %previous_id, %err, "previous segment missing")
            })?;
            expanded.text = format!("{}{SEPARATOR}{}", previous.text, expanded.text);
        }

        if let Some(next_id) = &segment.next_id {
            let next = self.index.get_by_id(next_id).await.inspect_err(|err| {
                error!(segment_id = %segment.id, %next_id, %err, "next segment missing")
            })?;
            expanded.text = format!("{}{SEPARATOR}{}", expanded.text, next.text);
        }

        Ok(expanded)
    }
}
