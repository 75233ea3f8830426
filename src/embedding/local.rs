//! In-process embeddings via fastembed.
//!
//! The model is downloaded from Hugging Face on first use and cached; after
//! that no network calls are made. Inference is CPU-bound and runs on the
//! blocking pool.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use newsdesk_core::embedding::{EmbeddingError, EmbeddingProvider};

use crate::config::EmbeddingConfig;

pub struct LocalProvider {
    model_name: String,
    dims: usize,
    model: fastembed::EmbeddingModel,
    /// Initialised lazily on the first embed call.
    engine: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = resolve_model(&config.model)?;
        if config.dims != dims {
            warn!(
                configured = config.dims,
                native = dims,
                "embedding.dims ignored for local model"
            );
        }
        Ok(Self {
            model_name: config.model.clone(),
            dims,
            model,
            engine: Arc::new(Mutex::new(None)),
        })
    }
}

fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel::*;
    Ok(match name {
        "all-minilm-l6-v2" => (AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (BGESmallENV15, 384),
        "bge-base-en-v1.5" => (BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (MultilingualE5Small, 384),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    })
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let engine = Arc::clone(&self.engine);
        let model = self.model.clone();
        let text = text.to_string();

        tokio::task::spawn_blocking(move || {
            let mut guard = engine.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.is_none() {
                info!(model = ?model, "loading local embedding model");
                let loaded = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| EmbeddingError::Network(format!("failed to load model: {}", e)))?;
                *guard = Some(loaded);
            }
            let engine = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::Malformed("model not loaded".to_string()))?;
            let mut vectors = engine
                .embed(vec![text], None)
                .map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
            vectors
                .pop()
                .ok_or_else(|| EmbeddingError::Malformed("no embedding returned".to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Malformed(format!("embedding task failed: {}", e)))?
    }
}
