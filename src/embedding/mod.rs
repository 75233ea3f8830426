//! Embedding provider implementations.
//!
//! Concrete backends for the [`EmbeddingProvider`] trait defined in
//! `newsdesk_core::embedding`:
//! - **[`DisabledProvider`]**: every call fails with [`EmbeddingError::Disabled`].
//! - **[`OpenAIProvider`]**: `POST {url}/embeddings` with retry and backoff.
//! - **[`OllamaProvider`]**: `POST {url}/api/embed` on a local Ollama.
//! - **`LocalProvider`**: in-process fastembed inference (`local-embeddings` feature).
//!
//! The [`processor`] module wraps a provider with text preparation, the
//! exact-text cache, and the per-call timeout.
//!
//! # Retry Strategy
//!
//! The HTTP providers retry transient failures with exponential backoff:
//! - HTTP 5xx and network errors → retry
//! - HTTP 429 or a quota message → [`EmbeddingError::Quota`], no retry
//! - HTTP 401/403 → [`EmbeddingError::Auth`], no retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings")]
mod local;
pub mod processor;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use newsdesk_core::embedding::{EmbeddingError, EmbeddingProvider};
use newsdesk_core::generation::looks_rate_limited;
pub use processor::EmbeddingProcessor;

#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;

use crate::config::EmbeddingConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ Shared HTTP plumbing ============

/// Retry settings shared by the HTTP providers.
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

/// POST a JSON body, retrying 5xx and connection failures.
///
/// Returns the decoded JSON body of the first successful response.
async fn post_json_with_retry(
    label: &str,
    request: impl Fn() -> reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<serde_json::Value, EmbeddingError> {
    let mut last_err = None;

    for attempt in 0..=policy.max_retries {
        if attempt > 0 {
            let delay = policy.delay(attempt);
            debug!(
                provider = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying embedding call"
            );
            tokio::time::sleep(delay).await;
        }

        match request().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| EmbeddingError::Malformed(e.to_string()));
                }

                let body_text = response.text().await.unwrap_or_default();
                let code = status.as_u16();

                if looks_rate_limited(Some(code), &body_text) {
                    return Err(EmbeddingError::Quota(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    )));
                }
                if code == 401 || code == 403 {
                    return Err(EmbeddingError::Auth(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    )));
                }
                if status.is_server_error() {
                    warn!(provider = label, status = code, "embedding provider server error");
                    last_err = Some(EmbeddingError::Network(format!(
                        "{} API error {}: {}",
                        label, status, body_text
                    )));
                    continue;
                }

                // Other client errors are not worth retrying.
                return Err(EmbeddingError::Malformed(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                warn!(provider = label, error = %e, "embedding request failed");
                last_err = Some(EmbeddingError::Network(format!(
                    "{} connection error: {}",
                    label, e
                )));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EmbeddingError::Network(format!("{} embedding failed after retries", label))
    }))
}

fn json_to_vector(value: &serde_json::Value, what: &str) -> Result<Vec<f32>, EmbeddingError> {
    let values = value
        .as_array()
        .ok_or_else(|| EmbeddingError::Malformed(format!("{} is not an array", what)))?;
    let vector: Vec<f32> = values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| EmbeddingError::Malformed(format!("{} holds a non-number", what)))
        })
        .collect::<Result<_, _>>()?;
    if vector.is_empty() {
        return Err(EmbeddingError::Malformed(format!("{} is empty", what)));
    }
    Ok(vector)
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires an API key, taken from `embedding.api_key` (populated from
/// `OPENAI_API_KEY` by the config loader).
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => bail!("OPENAI_API_KEY not set (required by the openai embedding provider)"),
        };
        if config.dims == 0 {
            bail!("embedding.dims required for OpenAI provider");
        }

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            dims: config.dims,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_secs(1),
            },
        })
    }

    /// Override the first backoff delay (doubles per attempt).
    pub fn with_backoff(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let endpoint = format!("{}/embeddings", self.url);

        let json = post_json_with_retry(
            "OpenAI",
            || {
                self.client
                    .post(&endpoint)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            &self.retry,
        )
        .await?;

        parse_openai_response(&json)
    }
}

/// Extract `data[0].embedding` from an OpenAI embeddings response.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .ok_or_else(|| EmbeddingError::Malformed("missing data array".to_string()))?;
    let embedding = first
        .get("embedding")
        .ok_or_else(|| EmbeddingError::Malformed("missing embedding".to_string()))?;
    json_to_vector(embedding, "embedding")
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled (e.g.
/// `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.dims == 0 {
            bail!("embedding.dims required for Ollama provider");
        }
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            dims: config.dims,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_secs(1),
            },
        })
    }

    pub fn with_backoff(mut self, base_delay: Duration) -> Self {
        self.retry.base_delay = base_delay;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let endpoint = format!("{}/api/embed", self.url);

        let json = post_json_with_retry(
            "Ollama",
            || {
                self.client
                    .post(&endpoint)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            &self.retry,
        )
        .await?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f32>, EmbeddingError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| EmbeddingError::Malformed("missing embeddings array".to_string()))?;
    json_to_vector(first, "embedding")
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"local"` | `LocalProvider` (requires `--features local-embeddings`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_config(url: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 3,
            url: Some(url.to_string()),
            api_key: Some("sk-test".to_string()),
            max_retries: 2,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let provider = DisabledProvider;
        assert_eq!(provider.model_name(), "disabled");
        assert_eq!(provider.embed("hello").await, Err(EmbeddingError::Disabled));
    }

    #[test]
    fn test_openai_requires_api_key() {
        let mut config = openai_config("http://localhost");
        config.api_key = None;
        let err = OpenAIProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_create_provider_dispatch() {
        let provider = create_provider(&EmbeddingConfig {
            provider: "disabled".to_string(),
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(provider.model_name(), "disabled");

        let err = create_provider(&EmbeddingConfig {
            provider: "cohere".to_string(),
            ..EmbeddingConfig::default()
        })
        .err()
        .unwrap();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[tokio::test]
    async fn test_openai_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "text-embedding-3-small",
                "input": "AI breakthrough"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{ "index": 0, "embedding": [0.1, 0.2, 0.3] }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(&openai_config(&server.uri())).unwrap();
        let vector = provider.embed("AI breakthrough").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_openai_quota_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": "insufficient_quota" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(&openai_config(&server.uri())).unwrap();
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Quota(_)));
    }

    #[tokio::test]
    async fn test_openai_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(&openai_config(&server.uri())).unwrap();
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Auth(_)));
    }

    #[tokio::test]
    async fn test_openai_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(&openai_config(&server.uri()))
            .unwrap()
            .with_backoff(Duration::from_millis(1));
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Network(_)));
    }

    #[tokio::test]
    async fn test_openai_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": []
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(&openai_config(&server.uri())).unwrap();
        let err = provider.embed("text").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_ollama_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "nomic-embed-text",
                "embeddings": [[1.0, 0.0, 0.5]]
            })))
            .mount(&server)
            .await;

        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dims: 3,
            url: Some(format!("{}/", server.uri())),
            ..EmbeddingConfig::default()
        };
        let provider = OllamaProvider::new(&config).unwrap();
        assert_eq!(provider.embed("hello").await.unwrap(), vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_parse_rejects_non_numeric_vectors() {
        let json = serde_json::json!({ "data": [{ "embedding": [0.1, "x"] }] });
        assert!(matches!(
            parse_openai_response(&json),
            Err(EmbeddingError::Malformed(_))
        ));
    }
}
