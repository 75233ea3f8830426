//! The assembled system.
//!
//! [`NewsDesk`] wires the feed connector, embedding processor, vector index,
//! ingestion loop and query engine together and exposes the operations the
//! HTTP server and the CLI use. The index and the processor (with its cache)
//! are the only things the ingestion and query paths share.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use newsdesk_core::embedding::EmbeddingProvider;
use newsdesk_core::generation::GenerativeProvider;
use newsdesk_core::index::{IndexOptions, SimilarityMetric, VectorIndex};
use newsdesk_core::models::{Answer, Document};

use crate::config::Config;
use crate::connector_news::{FeedConnector, FeedError, FeedSettings, NewsApiFeed, NewsFeed};
use crate::embedding::processor::{CacheStats, ProcessorOptions};
use crate::embedding::{create_provider, EmbeddingProcessor};
use crate::generation::create_generator;
use crate::ingest::{CycleReport, IngestPipeline, IngestState, IngestStats, Ingestion};
use crate::rag::{RagEngine, RagSettings};

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub size: usize,
    pub dimension: Option<usize>,
    pub metric: SimilarityMetric,
    pub max_entries: Option<usize>,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub index: IndexStats,
    pub ingestion_state: IngestState,
    pub ingestion: IngestStats,
    pub embedding_cache: CacheStats,
    pub embedding_model: String,
    pub generation_model: String,
    pub feed_configured: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
}

/// The live news question-answering service.
pub struct NewsDesk {
    config: Config,
    index: Arc<VectorIndex>,
    processor: Arc<EmbeddingProcessor>,
    engine: RagEngine,
    generation_model: String,
    connector: Option<Arc<FeedConnector>>,
    ingestion: Option<Ingestion>,
    started_at: DateTime<Utc>,
}

impl NewsDesk {
    /// Build the service with the providers named in `config`.
    ///
    /// A missing news API key is not an error here: questions can still be
    /// answered (from an empty index), and [`start_ingestion`](Self::start_ingestion)
    /// reports the missing credential.
    pub fn from_config(config: Config) -> Result<Self> {
        let feed: Option<Arc<dyn NewsFeed>> = match NewsApiFeed::new(&config.feed) {
            Ok(feed) => Some(Arc::new(feed)),
            Err(FeedError::MissingCredential) => {
                warn!("NEWS_API_KEY not set; ingestion unavailable");
                None
            }
            Err(e) => return Err(e.into()),
        };
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Ok(Self::new(config, feed, embedder, generator))
    }

    /// Build the service around explicit providers.
    pub fn new(
        config: Config,
        feed: Option<Arc<dyn NewsFeed>>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerativeProvider>,
    ) -> Self {
        let dims = embedder.dims();
        let index = Arc::new(VectorIndex::with_options(IndexOptions {
            metric: config.index.metric,
            max_entries: config.index.max_entries,
            dimension: (dims > 0).then_some(dims),
        }));
        let processor = Arc::new(EmbeddingProcessor::new(
            embedder,
            ProcessorOptions::from_config(&config.embedding, config.feed.document_text_chars),
        ));
        let generation_model = generator.model_name().to_string();
        let engine = RagEngine::new(
            Arc::clone(&processor),
            Arc::clone(&index),
            generator,
            RagSettings::from_config(&config.retrieval, &config.generation),
        );

        let connector = feed.map(|feed| {
            Arc::new(FeedConnector::new(feed, FeedSettings::from(&config.feed)))
        });
        let ingestion = connector.as_ref().map(|connector| {
            let pipeline = Arc::new(IngestPipeline::new(
                Arc::clone(connector),
                Arc::clone(&processor),
                Arc::clone(&index),
                config.embedding.concurrency,
            ));
            Ingestion::new(pipeline, Duration::from_secs(config.feed.poll_interval_secs))
        });

        info!(
            embedding_model = processor.model_name(),
            generation_model = %generation_model,
            feed = connector.as_ref().map(|c| c.feed_name()).unwrap_or("none"),
            "newsdesk initialised"
        );

        Self {
            config,
            index,
            processor,
            engine,
            generation_model,
            connector,
            ingestion,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &RagEngine {
        &self.engine
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub async fn submit_question(&self, question: &str, top_k: Option<usize>) -> Answer {
        self.engine.answer(question, top_k).await
    }

    pub fn index_size(&self) -> usize {
        self.index.size()
    }

    /// Up to `limit` indexed documents, newest first.
    pub fn recent_documents(&self, limit: usize) -> Vec<Document> {
        self.index.recent(limit)
    }

    /// Start the background loop. `Ok(false)` if it was already running.
    pub async fn start_ingestion(&self) -> Result<bool, FeedError> {
        match &self.ingestion {
            Some(ingestion) => Ok(ingestion.start().await),
            None => Err(FeedError::MissingCredential),
        }
    }

    /// Stop the background loop. `false` if it was not running.
    pub async fn stop_ingestion(&self) -> bool {
        match &self.ingestion {
            Some(ingestion) => ingestion.stop().await,
            None => false,
        }
    }

    /// Run `cycles` ingestion cycles in the foreground.
    pub async fn run_cycles(&self, cycles: usize) -> Result<Vec<CycleReport>, FeedError> {
        let ingestion = self.ingestion.as_ref().ok_or(FeedError::MissingCredential)?;
        let mut reports = Vec::with_capacity(cycles);
        for _ in 0..cycles {
            reports.push(ingestion.pipeline().run_cycle().await);
        }
        Ok(reports)
    }

    /// One raw poll, without embedding or indexing.
    pub async fn poll_feed(&self) -> Result<Vec<Document>, FeedError> {
        let connector = self.connector.as_ref().ok_or(FeedError::MissingCredential)?;
        Ok(connector.poll_once().await?.documents)
    }

    pub fn ingestion_state(&self) -> IngestState {
        self.ingestion
            .as_ref()
            .map(|i| i.pipeline().state())
            .unwrap_or(IngestState::Stopped)
    }

    pub fn stats(&self) -> ServiceStats {
        let ingestion = self
            .ingestion
            .as_ref()
            .map(|i| i.pipeline().stats())
            .unwrap_or_default();
        ServiceStats {
            index: IndexStats {
                size: self.index.size(),
                dimension: self.index.dimension(),
                metric: self.index.metric(),
                max_entries: self.index.max_entries(),
                evicted: self.index.evicted(),
            },
            ingestion_state: self.ingestion_state(),
            ingestion,
            embedding_cache: self.processor.cache_stats(),
            embedding_model: self.processor.model_name().to_string(),
            generation_model: self.generation_model.clone(),
            feed_configured: self.connector.is_some(),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}
