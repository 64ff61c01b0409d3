//! Embedding provider capability and its concrete clients.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub mod hashing;
pub mod openai;

pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

/// Turns text into fixed-width vectors.
///
/// Implementations must return exactly one vector per input, in input order,
/// and every vector from one provider must have the same dimension.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identity of the model; queries must use the identity the index was built with.
    fn model_id(&self) -> &str;

    /// Embeds one batch of texts.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<P> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed(texts)
    }
}

impl<P: EmbeddingProvider + ?Sized> EmbeddingProvider for Box<P> {
    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, ProviderError> {
        (**self).embed(texts)
    }
}

/// One failed provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The request never produced an HTTP response.
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The provider answered with a non-success status.
    #[error("embedding provider returned {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be understood.
    #[error("could not decode embedding response: {0}")]
    Decode(String),
    /// The provider broke the one-vector-per-input contract.
    #[error("provider returned {returned} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, returned: usize },
    /// The call did not finish within the caller's deadline.
    #[error("embedding call exceeded {0:?}")]
    Timeout(Duration),
    /// The provider cannot be constructed or used with the given settings.
    #[error("invalid provider configuration: {0}")]
    Configuration(String),
}

impl ProviderError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            ProviderError::Decode(_)
            | ProviderError::CountMismatch { .. }
            | ProviderError::Configuration(_) => false,
        }
    }
}

/// Checks the one-vector-per-input and equal-width contract on a provider response.
pub fn validate_batch(expected: usize, vectors: &[Vec<f32>]) -> Result<usize, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::CountMismatch {
            expected,
            returned: vectors.len(),
        });
    }
    let dimension = vectors.first().map(Vec::len).unwrap_or(0);
    if expected > 0 && dimension == 0 {
        return Err(ProviderError::Decode("provider returned empty vectors".into()));
    }
    if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimension) {
        return Err(ProviderError::Decode(format!(
            "mixed vector widths in one batch: {} and {}",
            dimension,
            bad.len()
        )));
    }
    Ok(dimension)
}
