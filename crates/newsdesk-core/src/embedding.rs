//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, the closed [`EmbeddingError`] taxonomy they report through,
//! and pure helpers for similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the `newsdesk`
//! app crate.

use async_trait::async_trait;
use thiserror::Error;

/// Why an embedding could not be produced.
///
/// Every provider failure is converted into one of these variants at the
/// provider boundary. Callers never see raw transport errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbeddingError {
    /// The provider refused the call for quota or rate-limit reasons.
    #[error("embedding quota exceeded: {0}")]
    Quota(String),

    /// The credential was missing or rejected.
    #[error("embedding authentication failed: {0}")]
    Auth(String),

    /// Connection failure or a 5xx response that outlived retries.
    #[error("embedding provider unreachable: {0}")]
    Network(String),

    /// The provider answered with something that is not a usable vector.
    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding call timed out after {0}s")]
    Timeout(u64),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("cannot embed empty text")]
    EmptyInput,
}

/// Trait for embedding providers.
///
/// Implementations map one piece of text to one vector of
/// [`dims`](EmbeddingProvider::dims) floats.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single, already prepared, non-empty text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Inner product of two equal-length vectors.
///
/// Returns `0.0` when the lengths differ.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit L2 norm.
///
/// A zero vector is returned unchanged, so its similarity to anything is
/// `0.0` rather than `NaN`.
pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}
