//! Generative answer provider trait.
//!
//! The query engine only needs two things from a language model: turn a
//! question plus a composed context into text, and say whether a failure
//! was a rate limit (answer degrades to a fallback) or anything else
//! (answer is an error).

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    /// HTTP 429, exhausted quota, or an equivalent provider signal.
    #[error("generation rate limited: {0}")]
    RateLimited(String),

    #[error("generation authentication failed: {0}")]
    Auth(String),

    #[error("generation provider unreachable: {0}")]
    Network(String),

    #[error("generation provider error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("generation call timed out after {0}s")]
    Timeout(u64),

    #[error("generation provider is not configured")]
    NotConfigured,
}

impl GenerationError {
    /// True for the failures that warrant a fallback answer.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, GenerationError::RateLimited(_))
    }
}

/// Trait for generative (chat completion) providers.
#[async_trait]
pub trait GenerativeProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"gpt-4o-mini"`).
    fn model_name(&self) -> &str;

    /// Answer `question` using only the supplied `context`.
    async fn generate(&self, question: &str, context: &str) -> Result<String, GenerationError>;
}

/// Decide whether a provider error body or message describes a rate limit.
///
/// Providers are inconsistent about how they surface quota exhaustion: some
/// only return a status code, others a 400/403 whose body mentions the quota.
pub fn looks_rate_limited(status: Option<u16>, message: &str) -> bool {
    if status == Some(429) {
        return true;
    }
    let lower = message.to_lowercase();
    lower.contains("error code: 429")
        || lower.contains("http/1.1 429")
        || lower.contains("insufficient_quota")
        || lower.contains("exceeded your current quota")
        || lower.contains("rate_limit_exceeded")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_rate_limited() {
        assert!(looks_rate_limited(Some(429), ""));
        assert!(looks_rate_limited(
            Some(400),
            r#"{"error":{"code":"insufficient_quota"}}"#
        ));
        assert!(looks_rate_limited(
            None,
            "You exceeded your current quota, please check your plan"
        ));
        assert!(!looks_rate_limited(Some(500), "internal error"));
        assert!(!looks_rate_limited(Some(401), "invalid api key"));
    }

    #[test]
    fn test_is_rate_limited() {
        assert!(GenerationError::RateLimited("429".into()).is_rate_limited());
        assert!(!GenerationError::Timeout(60).is_rate_limited());
        assert!(!GenerationError::NotConfigured.is_rate_limited());
    }
}
