use crate::context::ContextExpander;
use crate::embeddings::Embedder;
use crate::generation::LanguageModel;
use crate::models::{RetrievalOptions, Segment, NO_ANSWER_MARKER};
use crate::prompts::{build_user_prompt, SYSTEM_PROMPT};
use crate::traits::SegmentIndex;
use crate::RagError;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub attempts: usize,
    pub document_limit: usize,
    pub extra_context: bool,
}

impl Answer {
    pub fn is_no_answer(&self) -> bool {
        self.text.starts_with(NO_ANSWER_MARKER)
    }
}

/// Embeds a question, retrieves and widens segments, and asks the model.
pub struct RagPipeline<E, I, L>
where
    E: Embedder,
    I: SegmentIndex,
    L: LanguageModel,
{
    embedder: E,
    index: I,
    model: L,
    options: RetrievalOptions,
}

impl<E, I, L> RagPipeline<E, I, L>
where
    E: Embedder,
    I: SegmentIndex,
    L: LanguageModel,
{
    pub fn new(embedder: E, index: I, model: L, options: RetrievalOptions) -> Self {
        Self {
            embedder,
            index,
            model,
            options,
        }
    }

    /// Single attempt with an explicit retrieval width and context policy.
    pub async fn run(
        &self,
        query: &str,
        document_limit: usize,
        extra_context: bool,
    ) -> Result<String, RagError> {
        let query_vector = self.embed_query(query).await?;
        self.attempt(query.trim(), &query_vector, document_limit, extra_context)
            .await
    }

    /// Answers `query`, widening retrieval while the model reports that the
    /// documents hold no answer.
    ///
    /// Every retry adds `doc_limit_increment` documents and forces context
    /// expansion. Once `max_retries` extra attempts are spent the last
    /// response is returned as is.
    pub async fn run_with_retry(&self, query: &str) -> Result<Answer, RagError> {
        let query_vector = self.embed_query(query).await?;
        let query = query.trim();

        let mut document_limit = self.options.document_limit;
        let mut extra_context = self.options.extra_context;
        let mut current_try = 0;

        loop {
            let text = self
                .attempt(query, &query_vector, document_limit, extra_context)
                .await?;
            let answer = Answer {
                text,
                attempts: current_try + 1,
                document_limit,
                extra_context,
            };

            if !answer.is_no_answer() {
                if current_try > 0 {
                    info!(attempts = answer.attempts, document_limit, "answered after retry");
                }
                return Ok(answer);
            }
            if current_try >= self.options.max_retries {
                info!(attempts = answer.attempts, "no answer found, retries exhausted");
                return Ok(answer);
            }

            current_try += 1;
            document_limit += self.options.doc_limit_increment;
            extra_context = true;
            debug!(current_try, document_limit, "no answer found, widening retrieval");
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, RagError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::EmptyQuery);
        }

        let start = Instant::now();
        let vector = self.embedder.embed(query).await?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "query embedded");
        Ok(vector)
    }

    async fn attempt(
        &self,
        query: &str,
        query_vector: &[f32],
        document_limit: usize,
        extra_context: bool,
    ) -> Result<String, RagError> {
        let start = Instant::now();
        let hits = self
            .index
            .nearest_neighbors(query_vector, document_limit)
            .await?;

        let mut segments: Vec<Segment> = Vec::with_capacity(hits.len());
        if extra_context {
            let expander = ContextExpander::new(&self.index);
            for hit in &hits {
                segments.push(expander.expand(&hit.segment).await?);
            }
        } else {
            segments.extend(hits.into_iter().map(|hit| hit.segment));
        }
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            hits = segments.len(),
            extra_context,
            "segments retrieved"
        );

        let prompt = build_user_prompt(query, &segments);

        let start = Instant::now();
        let response = self.model.generate(SYSTEM_PROMPT, &prompt).await?;
        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "language model answered");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::ModelError;
    use crate::models::SegmentId;
    use crate::stores::InMemoryIndex;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const HOPPLA: &str = "Hoppla! Zu der Frage konnten keine Informationen gefunden werden.";

    #[derive(Default)]
    struct CountingEmbedder {
        inner: CharacterNgramEmbedder,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.inner.embed_text(text))
        }
    }

    /// Answers only once the prompt holds at least `needed` hits.
    struct ThresholdModel {
        needed: usize,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LanguageModel for ThresholdModel {
        async fn generate(&self, _system: &str, user: &str) -> Result<String, ModelError> {
            self.prompts.lock().expect("prompt log").push(user.to_string());
            let hits = user.matches("Treffer ").count();
            if hits >= self.needed {
                Ok("Die Grundzulage beträgt 175 Euro.".to_string())
            } else {
                Ok(HOPPLA.to_string())
            }
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn generate(&self, _system: &str, _user: &str) -> Result<String, ModelError> {
            Err(ModelError::Status {
                service: "chat completions".to_string(),
                status: 401,
                body: "invalid api key".to_string(),
            })
        }
    }

    async fn corpus(size: usize) -> InMemoryIndex {
        let embedder = CharacterNgramEmbedder::default();
        let ids: Vec<SegmentId> = (0..size).map(|_| SegmentId::generate()).collect();
        let segments: Vec<Segment> = (0..size)
            .map(|position| {
                let text = format!("Randnummer {position} zur Riester-Förderung");
                Segment {
                    id: ids[position],
                    embedding: embedder.embed_text(&text),
                    text,
                    source_path: "/data/pdfs/BMF_2023_10_05.pdf".to_string(),
                    source_filename: "BMF_2023_10_05.pdf".to_string(),
                    page: (position + 1).to_string(),
                    document_date: NaiveDate::from_ymd_opt(2023, 10, 5).expect("valid date"),
                    previous_id: position.checked_sub(1).map(|prev| ids[prev]),
                    next_id: ids.get(position + 1).copied(),
                }
            })
            .collect();
        let mut index = InMemoryIndex::new();
        index.index(&segments).await.expect("index builds");
        index
    }

    fn options(extra_context: bool) -> RetrievalOptions {
        RetrievalOptions {
            document_limit: 5,
            extra_context,
            max_retries: 2,
            doc_limit_increment: 2,
        }
    }

    #[tokio::test]
    async fn widened_retry_returns_the_real_answer() {
        let embedder = CountingEmbedder::default();
        let embed_calls = embedder.calls.clone();
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let model = ThresholdModel {
            needed: 7,
            prompts: prompts.clone(),
        };
        let pipeline = RagPipeline::new(embedder, corpus(20).await, model, options(false));

        let answer = pipeline
            .run_with_retry("Wie hoch ist die Grundzulage?")
            .await
            .expect("pipeline runs");

        assert_eq!(answer.text, "Die Grundzulage beträgt 175 Euro.");
        assert_eq!(answer.attempts, 2);
        assert_eq!(answer.document_limit, 5 + 2);
        assert!(answer.extra_context);
        assert_eq!(embed_calls.load(Ordering::SeqCst), 1);

        let prompts = prompts.lock().expect("prompt log");
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].contains("Treffer 5 von 5:"));
        assert!(prompts[1].contains("Treffer 7 von 7:"));
        // Forced expansion pulls neighbour text into the widened prompt.
        assert!(prompts[1].matches("Randnummer").count() > 7);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_last_response() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let model = ThresholdModel {
            needed: usize::MAX,
            prompts: prompts.clone(),
        };
        let pipeline = RagPipeline::new(
            CharacterNgramEmbedder::default(),
            corpus(20).await,
            model,
            options(true),
        );

        let answer = pipeline.run_with_retry("Wer war Präsident der USA?").await.unwrap();

        assert_eq!(answer.text, HOPPLA);
        assert!(answer.is_no_answer());
        assert_eq!(answer.attempts, 3);
        assert_eq!(answer.document_limit, 9);
        assert_eq!(prompts.lock().expect("prompt log").len(), 3);
    }

    #[tokio::test]
    async fn first_answer_needs_no_retry() {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let model = ThresholdModel {
            needed: 1,
            prompts: prompts.clone(),
        };
        let pipeline = RagPipeline::new(
            CharacterNgramEmbedder::default(),
            corpus(3).await,
            model,
            options(false),
        );

        let answer = pipeline.run_with_retry("Grundzulage").await.unwrap();
        assert_eq!(answer.attempts, 1);
        assert!(!answer.extra_context);
        assert!(prompts.lock().expect("prompt log")[0].contains("Treffer 3 von 3:"));
    }

    #[tokio::test]
    async fn model_failures_propagate() {
        let pipeline = RagPipeline::new(
            CharacterNgramEmbedder::default(),
            corpus(3).await,
            FailingModel,
            options(true),
        );
        let result = pipeline.run_with_retry("Grundzulage").await;
        assert!(matches!(result, Err(RagError::Model(ModelError::Status { status: 401, .. }))));
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let pipeline = RagPipeline::new(
            CharacterNgramEmbedder::default(),
            corpus(3).await,
            FailingModel,
            options(true),
        );
        assert!(matches!(pipeline.run("   ", 5, false).await, Err(RagError::EmptyQuery)));
    }
}
