//! Configuration parsing and validation.
//!
//! newsdesk is configured via a TOML file (default `config/newsdesk.toml`)
//! whose every key has a default, followed by environment overrides. A
//! missing file is not an error: the defaults plus `NEWS_API_KEY` and
//! `OPENAI_API_KEY` are enough to run.
//!
//! ```toml
//! [feed]
//! poll_interval_secs = 60
//! batch_size = 20
//! queries = ["technology", "science"]
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [index]
//! max_entries = 50000
//!
//! [retrieval]
//! top_k = 5
//! max_context_chars = 3000
//!
//! [server]
//! bind = "0.0.0.0:8000"
//! ```

use anyhow::{bail, Context, Result};
use newsdesk_core::index::SimilarityMetric;
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Upper bound for `feed.retention_days` (ten years).
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

// ============ Feed ============

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub base_url: String,
    /// NewsAPI key. Usually supplied through `NEWS_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_feed_batch")]
    pub batch_size: usize,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_sort_by")]
    pub sort_by: String,
    /// Search queries, one per poll, rotated round-robin.
    #[serde(default = "default_queries")]
    pub queries: Vec<String>,
    /// Only request articles published within this many days.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_feed_timeout")]
    pub timeout_secs: u64,
    /// Bound the seen-id set with LRU eviction. Unbounded when unset.
    #[serde(default)]
    pub seen_capacity: Option<usize>,
    /// Characters of title + description + body used for a document's embedding.
    #[serde(default = "default_document_chars")]
    pub document_text_chars: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: default_feed_url(),
            api_key: None,
            poll_interval_secs: default_poll_interval(),
            batch_size: default_feed_batch(),
            language: default_language(),
            sort_by: default_sort_by(),
            queries: default_queries(),
            retention_days: default_retention_days(),
            timeout_secs: default_feed_timeout(),
            seen_capacity: None,
            document_text_chars: default_document_chars(),
        }
    }
}

fn default_feed_url() -> String {
    "https://newsapi.org/v2".to_string()
}
fn default_poll_interval() -> u64 {
    60
}
fn default_feed_batch() -> usize {
    20
}
fn default_language() -> String {
    "en".to_string()
}
fn default_sort_by() -> String {
    "publishedAt".to_string()
}
fn default_queries() -> Vec<String> {
    ["technology", "business", "health", "science", "entertainment"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_retention_days() -> i64 {
    7
}
fn default_feed_timeout() -> u64 {
    10
}
fn default_document_chars() -> usize {
    1000
}

// ============ Embedding ============

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `openai`, `ollama`, `local`, or `disabled`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    /// Provider base URL; each provider has its own default.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Exact-text LRU cache entries. `0` disables the cache.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Embedding calls in flight per ingestion cycle.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_dims(),
            url: None,
            api_key: None,
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            max_input_chars: default_max_input_chars(),
            cache_capacity: default_cache_capacity(),
            concurrency: default_concurrency(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8191
}
fn default_cache_capacity() -> usize {
    1024
}
fn default_concurrency() -> usize {
    4
}

// ============ Generation ============

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `openai` or `disabled`.
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_llm_model(),
            url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout() -> u64 {
    60
}

// ============ Index / retrieval / server ============

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IndexConfig {
    #[serde(default)]
    pub metric: SimilarityMetric,
    /// Retention cap; oldest entries are evicted first. Unbounded when unset.
    #[serde(default)]
    pub max_entries: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    /// Drop retrieved documents scoring below this similarity.
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_top_k: default_max_top_k(),
            max_context_chars: default_max_context_chars(),
            min_similarity: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_max_top_k() -> usize {
    20
}
fn default_max_context_chars() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `newsdesk=debug,info`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============ Loading ============

/// Read, override from the process environment, and validate.
///
/// A missing file yields the built-in defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Empty values are ignored. Malformed numbers are an error rather than
/// being silently dropped.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: '{}' ({})", key, value, e))
    }

    if let Some(v) = get("NEWS_API_KEY") {
        config.feed.api_key = Some(v);
    }
    if let Some(v) = get("OPENAI_API_KEY") {
        if config.embedding.api_key.is_none() {
            config.embedding.api_key = Some(v.clone());
        }
        if config.generation.api_key.is_none() {
            config.generation.api_key = Some(v);
        }
    }
    if let Some(v) = get("NEWS_API_BASE_URL") {
        config.feed.base_url = v;
    }
    if let Some(v) = get("NEWS_POLLING_INTERVAL") {
        config.feed.poll_interval_secs = parse("NEWS_POLLING_INTERVAL", &v)?;
    }
    if let Some(v) = get("NEWS_BATCH_SIZE") {
        config.feed.batch_size = parse("NEWS_BATCH_SIZE", &v)?;
    }
    if let Some(v) = get("NEWS_LANGUAGE") {
        config.feed.language = v;
    }
    if let Some(v) = get("NEWS_SORT_BY") {
        config.feed.sort_by = v;
    }
    if let Some(v) = get("ARTICLE_RETENTION_DAYS") {
        config.feed.retention_days = parse("ARTICLE_RETENTION_DAYS", &v)?;
    }
    if let Some(v) = get("EMBEDDING_MODEL") {
        config.embedding.model = v;
    }
    if let Some(v) = get("LLM_MODEL") {
        config.generation.model = v;
    }
    if let Some(v) = get("LLM_TEMPERATURE") {
        config.generation.temperature = parse("LLM_TEMPERATURE", &v)?;
    }
    if let Some(v) = get("LLM_MAX_TOKENS") {
        config.generation.max_tokens = parse("LLM_MAX_TOKENS", &v)?;
    }
    if let Some(v) = get("TOP_K_RESULTS") {
        config.retrieval.top_k = parse("TOP_K_RESULTS", &v)?;
    }
    if let Some(v) = get("MAX_CONTEXT_LENGTH") {
        config.retrieval.max_context_chars = parse("MAX_CONTEXT_LENGTH", &v)?;
    }
    if let Some(v) = get("SIMILARITY_THRESHOLD") {
        config.retrieval.min_similarity = Some(parse("SIMILARITY_THRESHOLD", &v)?);
    }
    if let Some(v) = get("SERVER_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = get("LOG_LEVEL") {
        config.logging.level = v.to_lowercase();
    }

    config.generation.model = normalize_llm_model(&config.generation.model);
    Ok(())
}

/// Map retired chat model names onto a supported one.
pub fn normalize_llm_model(model: &str) -> String {
    let trimmed = model.trim();
    match trimmed {
        "" => default_llm_model(),
        "gpt-4-turbo" | "gpt-3.5-turbo" => {
            warn!(model = trimmed, replacement = "gpt-4o-mini", "deprecated LLM model");
            default_llm_model()
        }
        other => other.to_string(),
    }
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate feed
    if config.feed.poll_interval_secs == 0 {
        bail!("feed.poll_interval_secs must be > 0");
    }
    if !(1..=100).contains(&config.feed.batch_size) {
        bail!("feed.batch_size must be in [1, 100]");
    }
    if config.feed.queries.iter().all(|q| q.trim().is_empty()) {
        bail!("feed.queries must contain at least one non-empty query");
    }
    if !(1..=MAX_RETENTION_DAYS).contains(&config.feed.retention_days) {
        bail!("feed.retention_days must be in [1, {}]", MAX_RETENTION_DAYS);
    }
    if config.feed.seen_capacity == Some(0) {
        bail!("feed.seen_capacity must be > 0 when set");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.dims == 0 {
        bail!(
            "embedding.dims must be > 0 when provider is '{}'",
            config.embedding.provider
        );
    }
    if config.embedding.max_input_chars == 0 {
        bail!("embedding.max_input_chars must be > 0");
    }
    if config.embedding.concurrency == 0 {
        bail!("embedding.concurrency must be >= 1");
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Validate retrieval
    if config.retrieval.max_top_k < 1 {
        bail!("retrieval.max_top_k must be >= 1");
    }
    if !(1..=config.retrieval.max_top_k).contains(&config.retrieval.top_k) {
        bail!(
            "retrieval.top_k must be in [1, {}]",
            config.retrieval.max_top_k
        );
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }
    if let Some(threshold) = config.retrieval.min_similarity {
        if !(-1.0..=1.0).contains(&threshold) {
            bail!("retrieval.min_similarity must be in [-1.0, 1.0]");
        }
    }
    if config.index.max_entries == Some(0) {
        bail!("index.max_entries must be > 0 when set");
    }

    Ok(())
}
