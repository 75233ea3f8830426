//! Retrieval-augmented answering.
//!
//! [`RagEngine::answer`] always returns an [`Answer`]; every failure along
//! the way is folded into its [`AnswerStatus`]:
//!
//! | Step | Failure | Status |
//! |------|---------|--------|
//! | embed question | any [`EmbeddingError`](newsdesk_core::embedding::EmbeddingError) | `error` |
//! | retrieve | index holds nothing | `index_empty` |
//! | retrieve | nothing above `min_similarity` | `no_relevant_documents` |
//! | generate | rate limit / quota | `fallback` (notice + context) |
//! | generate | anything else | `error` (sources kept) |
//!
//! The engine only reads the index.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use newsdesk_core::context::{compose_context, summarize_documents};
use newsdesk_core::generation::{GenerationError, GenerativeProvider};
use newsdesk_core::index::VectorIndex;
use newsdesk_core::models::{Answer, AnswerStatus, Document, ScoredDocument};

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::embedding::EmbeddingProcessor;

/// Answer text (and note) used when generation is rate limited.
pub const FALLBACK_NOTICE: &str =
    "AI model temporarily unavailable. Showing retrieved news context.";

const INDEX_EMPTY_MESSAGE: &str =
    "No articles have been indexed yet. Please wait for ingestion to complete.";

const NO_RELEVANT_MESSAGE: &str = "No relevant articles found to answer your question.";

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub default_top_k: usize,
    pub max_top_k: usize,
    pub max_context_chars: usize,
    pub min_similarity: Option<f32>,
    pub generation_timeout: Duration,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            max_top_k: 20,
            max_context_chars: 3000,
            min_similarity: None,
            generation_timeout: Duration::from_secs(60),
        }
    }
}

impl RagSettings {
    pub fn from_config(retrieval: &RetrievalConfig, generation: &GenerationConfig) -> Self {
        Self {
            default_top_k: retrieval.top_k,
            max_top_k: retrieval.max_top_k,
            max_context_chars: retrieval.max_context_chars,
            min_similarity: retrieval.min_similarity,
            generation_timeout: Duration::from_secs(generation.timeout_secs),
        }
    }
}

pub struct RagEngine {
    processor: Arc<EmbeddingProcessor>,
    index: Arc<VectorIndex>,
    generator: Arc<dyn GenerativeProvider>,
    settings: RagSettings,
}

impl RagEngine {
    pub fn new(
        processor: Arc<EmbeddingProcessor>,
        index: Arc<VectorIndex>,
        generator: Arc<dyn GenerativeProvider>,
        settings: RagSettings,
    ) -> Self {
        Self {
            processor,
            index,
            generator,
            settings,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// `top_k`, or the default, clamped to `[1, max_top_k]`.
    pub fn clamp_top_k(&self, top_k: Option<usize>) -> usize {
        top_k
            .unwrap_or(self.settings.default_top_k)
            .clamp(1, self.settings.max_top_k.max(1))
    }

    pub async fn answer(&self, question: &str, top_k: Option<usize>) -> Answer {
        let k = self.clamp_top_k(top_k);
        info!(question, k, "answering question");

        // 1. Embed the question.
        let probe = match self.processor.embed_text(question).await {
            Ok(vector) => vector,
            Err(e) => {
                warn!(error = %e, "question embedding failed");
                return Answer::bare(
                    question,
                    AnswerStatus::Error,
                    format!("Error embedding question: {}", e),
                    self.index.size(),
                );
            }
        };

        // 2. Retrieve.
        let index_size = self.index.size();
        if index_size == 0 {
            return Answer::bare(question, AnswerStatus::IndexEmpty, INDEX_EMPTY_MESSAGE, 0);
        }
        let mut retrieved = match self.index.query(&probe, k) {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "retrieval failed");
                return Answer::bare(
                    question,
                    AnswerStatus::Error,
                    format!("Error retrieving articles: {}", e),
                    index_size,
                );
            }
        };
        if retrieved.is_empty() {
            return Answer::bare(question, AnswerStatus::IndexEmpty, INDEX_EMPTY_MESSAGE, 0);
        }
        if let Some(threshold) = self.settings.min_similarity {
            retrieved.retain(|r| r.score >= threshold);
            if retrieved.is_empty() {
                return Answer::bare(
                    question,
                    AnswerStatus::NoRelevantDocuments,
                    NO_RELEVANT_MESSAGE,
                    index_size,
                );
            }
        }
        let documents: Vec<Document> = retrieved
            .into_iter()
            .map(|ScoredDocument { document, .. }| document)
            .collect();

        // 3. Compose the bounded context.
        let context = compose_context(&documents, self.settings.max_context_chars);

        let mut answer = Answer {
            question: question.to_string(),
            answer: String::new(),
            status: AnswerStatus::Ok,
            sources: context.sources.clone(),
            article_summaries: Vec::new(),
            num_documents: context.document_count(),
            index_size,
            note: None,
            timestamp: Utc::now(),
        };

        // 4. Generate.
        let timeout = self.settings.generation_timeout;
        let generated =
            match tokio::time::timeout(timeout, self.generator.generate(question, &context.text))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(timeout.as_secs())),
            };

        match generated {
            Ok(text) => {
                answer.answer = text;
            }
            Err(e) if e.is_rate_limited() => {
                warn!(error = %e, "generation rate limited; answering with retrieved context");
                answer.status = AnswerStatus::Fallback;
                answer.answer = format!("{}\n\n{}", FALLBACK_NOTICE, context.text);
                answer.article_summaries = summarize_documents(&documents);
                answer.note = Some(FALLBACK_NOTICE.to_string());
            }
            Err(e) => {
                warn!(error = %e, "generation failed");
                answer.status = AnswerStatus::Error;
                answer.answer = format!("Error generating answer: {}", e);
            }
        }
        answer.timestamp = Utc::now();
        answer
    }
}
