//! Deterministic fakes shared by the unit tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use newsdesk_core::embedding::{EmbeddingError, EmbeddingProvider};
use newsdesk_core::generation::{GenerationError, GenerativeProvider};

use crate::connector_news::{FeedError, FeedQuery, NewsFeed, RawArticle, RawSource};

pub fn article(url: &str, title: &str, content: &str) -> RawArticle {
    RawArticle {
        source: Some(RawSource {
            id: None,
            name: Some("Wire".to_string()),
        }),
        title: Some(title.to_string()),
        url: Some(url.to_string()),
        content: Some(content.to_string()),
        published_at: Some("2024-01-18T10:00:00Z".to_string()),
        ..RawArticle::default()
    }
}

/// Hands out one scripted response per poll, then empty batches.
pub struct ScriptedFeed {
    responses: Mutex<Vec<Result<Vec<RawArticle>, FeedError>>>,
    pub polls: AtomicUsize,
}

impl ScriptedFeed {
    pub fn new(mut responses: Vec<Result<Vec<RawArticle>, FeedError>>) -> Arc<Self> {
        responses.reverse();
        Arc::new(Self {
            responses: Mutex::new(responses),
            polls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl NewsFeed for ScriptedFeed {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn poll(&self, _query: &FeedQuery) -> Result<Vec<RawArticle>, FeedError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        self.responses.lock().unwrap().pop().unwrap_or(Ok(Vec::new()))
    }
}

const TOPICS: [&[&str]; 3] = [
    &["ai", "model", "models", "research", "researchers", "breakthrough"],
    &["market", "markets", "stock", "stocks", "rally", "shares"],
    &["weather", "storm", "rain"],
];

/// Embeds text as keyword counts per topic, plus a small bias axis.
///
/// Texts containing `"FAIL"` are refused with a network error.
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        4
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return Err(EmbeddingError::Network("scripted failure".to_string()));
        }
        let mut vector = vec![0.0, 0.0, 0.0, 0.1];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            for (axis, words) in TOPICS.iter().enumerate() {
                if words.contains(&word.as_str()) {
                    vector[axis] += 1.0;
                }
            }
        }
        Ok(vector)
    }
}

/// Returns a fixed answer or a fixed error.
pub struct FixedGenerator {
    pub result: Result<String, GenerationError>,
    pub contexts: Mutex<Vec<String>>,
}

impl FixedGenerator {
    pub fn answering(text: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(error: GenerationError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            contexts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl GenerativeProvider for FixedGenerator {
    fn model_name(&self) -> &str {
        "fixed"
    }
    async fn generate(&self, _question: &str, context: &str) -> Result<String, GenerationError> {
        self.contexts.lock().unwrap().push(context.to_string());
        self.result.clone()
    }
}
