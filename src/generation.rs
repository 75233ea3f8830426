//! Chat-completion providers for answer generation.
//!
//! Implements [`GenerativeProvider`] against the OpenAI chat completions API
//! (`POST {url}/chat/completions`). Failures are classified at this boundary:
//! anything that looks like a rate limit or exhausted quota becomes
//! [`GenerationError::RateLimited`], which the query engine turns into a
//! fallback answer instead of an error.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

pub use newsdesk_core::generation::{GenerationError, GenerativeProvider};
use newsdesk_core::generation::looks_rate_limited;

use crate::config::GenerationConfig;

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

const SYSTEM_PROMPT: &str = "You are a helpful news assistant. Answer user questions based on the provided news articles.
Always cite the sources and dates of the articles you reference.
If you cannot answer based on the provided articles, say so clearly.
Keep your answer concise but informative.";

/// The user turn sent alongside [`SYSTEM_PROMPT`].
pub fn user_prompt(question: &str, context: &str) -> String {
    format!(
        "Based on the following news articles, please answer the question.\n\n\
         News Articles:\n{}\n\n\
         Question: {}\n\n\
         Please provide a well-reasoned answer citing specific articles when relevant.",
        context, question
    )
}

// ============ Disabled Generator ============

/// Used when `generation.provider = "disabled"` or no API key is configured.
pub struct DisabledGenerator;

#[async_trait]
impl GenerativeProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _question: &str, _context: &str) -> Result<String, GenerationError> {
        Err(GenerationError::NotConfigured)
    }
}

// ============ OpenAI Chat Provider ============

pub struct OpenAIChatProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout_secs: u64,
}

impl OpenAIChatProvider {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = match config.api_key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => key.to_string(),
            _ => bail!("OPENAI_API_KEY not set (required by the openai generation provider)"),
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl GenerativeProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": user_prompt(question, context) },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        debug!(
            model = %self.model,
            context_chars = context.chars().count(),
            "requesting completion"
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(self.timeout_secs)
                } else {
                    GenerationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let code = status.as_u16();
            error!(status = code, "chat completion failed");
            return Err(classify_failure(code, body_text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        parse_chat_response(&json)
    }
}

fn classify_failure(status: u16, body: String) -> GenerationError {
    if looks_rate_limited(Some(status), &body) {
        GenerationError::RateLimited(body)
    } else if status == 401 || status == 403 {
        GenerationError::Auth(body)
    } else {
        GenerationError::Api {
            status,
            message: extract_error_message(&body).unwrap_or(body),
        }
    }
}

/// Pull `error.message` out of an OpenAI error body, if present.
fn extract_error_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String, GenerationError> {
    let content = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message".to_string()))?;
    // A null content is an empty answer, not a malformed response.
    Ok(content.as_str().unwrap_or_default().trim().to_string())
}

/// Create the configured [`GenerativeProvider`].
///
/// A missing API key is not fatal: answers fall back to
/// [`DisabledGenerator`], which makes every question an `error` answer
/// while retrieval keeps working.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn GenerativeProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => {
            if config.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                tracing::warn!("OPENAI_API_KEY not set; answer generation disabled");
                return Ok(Arc::new(DisabledGenerator));
            }
            Ok(Arc::new(OpenAIChatProvider::new(config)?))
        }
        other => bail!("Unknown generation provider: {}", other),
    }
}
