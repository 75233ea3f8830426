//! Text → vector, with preparation, caching and a timeout.
//!
//! Both the ingestion loop and the query engine embed through one shared
//! [`EmbeddingProcessor`], so a question that repeats a headline verbatim
//! is served from the same cache.
//!
//! ```text
//! text ──▶ prepare ──▶ sha256 ──▶ LRU hit? ──yes──▶ vector
//!                                    │
//!                                    no
//!                                    ▼
//!                      timeout(provider.embed) ──▶ dim check ──▶ cache ──▶ vector
//! ```
//!
//! The cache mutex is only held for the lookup and the store, never while
//! the provider call is in flight. Two concurrent misses on the same text
//! both call the provider; the second store overwrites the first.

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use newsdesk_core::embedding::{EmbeddingError, EmbeddingProvider};
use newsdesk_core::models::{truncate_chars, Document};

use crate::config::EmbeddingConfig;

/// Tunables for an [`EmbeddingProcessor`].
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Prepared text is cut to this many characters.
    pub max_input_chars: usize,
    /// Characters of a document handed to [`Document::embedding_text`].
    pub document_chars: usize,
    /// Cache entries; `0` disables caching.
    pub cache_capacity: usize,
    pub timeout: Duration,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            max_input_chars: 8191,
            document_chars: 1000,
            cache_capacity: 1024,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ProcessorOptions {
    pub fn from_config(config: &EmbeddingConfig, document_chars: usize) -> Self {
        Self {
            max_input_chars: config.max_input_chars,
            document_chars,
            cache_capacity: config.cache_capacity,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

pub struct EmbeddingProcessor {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
    options: ProcessorOptions,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingProcessor {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, options: ProcessorOptions) -> Self {
        let cache = NonZeroUsize::new(options.cache_capacity)
            .map(|capacity| Mutex::new(LruCache::new(capacity)));
        Self {
            provider,
            cache,
            options,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Fold newlines, trim, and cut to the input budget.
    ///
    /// Returns `None` when nothing embeddable is left.
    pub fn prepare(&self, text: &str) -> Option<String> {
        let folded = text.replace(['\r', '\n'], " ");
        let trimmed = folded.trim();
        if trimmed.is_empty() {
            return None;
        }
        Some(truncate_chars(trimmed, self.options.max_input_chars).to_string())
    }

    /// Embed an arbitrary text (e.g. a question).
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let prepared = self.prepare(text).ok_or(EmbeddingError::EmptyInput)?;
        let key = cache_key(&prepared);

        if let Some(hit) = self.cache_get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let timeout = self.options.timeout;
        let vector = match tokio::time::timeout(timeout, self.provider.embed(&prepared)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "embedding call timed out");
                return Err(EmbeddingError::Timeout(timeout.as_secs()));
            }
        };

        if vector.is_empty() {
            return Err(EmbeddingError::Malformed(
                "provider returned an empty vector".to_string(),
            ));
        }
        let expected = self.provider.dims();
        if expected > 0 && vector.len() != expected {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} dimensions, got {}",
                expected,
                vector.len()
            )));
        }

        self.cache_put(key, vector.clone());
        Ok(vector)
    }

    /// Embed a document's title, description and body.
    pub async fn embed_document(&self, document: &Document) -> Result<Vec<f32>, EmbeddingError> {
        debug!(id = %document.id, "embedding document");
        self.embed_text(&document.embedding_text(self.options.document_chars))
            .await
    }

    pub fn cache_stats(&self) -> CacheStats {
        let (entries, capacity) = match &self.cache {
            Some(cache) => {
                let cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
                (cache.len(), cache.cap().get())
            }
            None => (0, 0),
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries,
            capacity,
        }
    }

    fn cache_get(&self, key: &str) -> Option<Vec<f32>> {
        let cache = self.cache.as_ref()?;
        let mut cache = cache.lock().unwrap_or_else(PoisonError::into_inner);
        cache.get(key).cloned()
    }

    fn cache_put(&self, key: String, vector: Vec<f32>) {
        if let Some(cache) = &self.cache {
            cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .put(key, vector);
        }
    }
}

fn cache_key(prepared: &str) -> String {
    hex::encode(Sha256::digest(prepared.as_bytes()))
}
