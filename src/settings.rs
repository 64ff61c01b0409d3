//! Command-line and environment settings shared by the binaries.

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};

use crate::embedder::hashing::DEFAULT_HASHING_DIMENSIONS;
use crate::embedder::openai::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::embedder::{EmbeddingProvider, HashingEmbedder, OpenAiEmbedder, ProviderError};
use crate::pipeline::{PipelineConfig, DEFAULT_BATCH_SIZE};
use crate::retry::RetryPolicy;

/// Which embedding backend to use.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP endpoint.
    Openai,
    /// Offline feature hashing; no network, lexical similarity only.
    Hashing,
}

/// Embedding provider selection. Ingest and query must agree on these.
#[derive(Args, Debug, Clone)]
pub struct EmbedderArgs {
    /// Embedding backend
    #[arg(long, env = "GRIDRAG_PROVIDER", value_enum, default_value_t = ProviderKind::Openai)]
    pub provider: ProviderKind,

    /// API key for the OpenAI-compatible endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Embedding model identifier
    #[arg(long, env = "GRIDRAG_EMBED_MODEL", default_value = DEFAULT_MODEL)]
    pub embed_model: String,

    /// Optional dimension override when supported by the model
    #[arg(long, env = "GRIDRAG_EMBED_DIMENSIONS")]
    pub embed_dimensions: Option<usize>,

    /// Base URL for the OpenAI-compatible API
    #[arg(long, env = "GRIDRAG_OPENAI_BASE", default_value = DEFAULT_BASE_URL)]
    pub openai_base_url: String,

    /// Vector width for the hashing provider
    #[arg(long, env = "GRIDRAG_HASHING_DIMENSIONS", default_value_t = DEFAULT_HASHING_DIMENSIONS)]
    pub hashing_dimensions: usize,

    /// Max seconds to wait for each embedding request
    #[arg(long, env = "GRIDRAG_EMBED_TIMEOUT_SECS", default_value_t = 60)]
    pub embed_timeout_secs: u64,
}

impl EmbedderArgs {
    /// Per-call deadline.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs.max(1))
    }

    /// Builds the selected provider.
    pub fn build_provider(&self) -> Result<Arc<dyn EmbeddingProvider>, ProviderError> {
        match self.provider {
            ProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(self.hashing_dimensions))),
            ProviderKind::Openai => {
                let key = self.openai_api_key.as_deref().ok_or_else(|| {
                    ProviderError::Configuration(
                        "OPENAI_API_KEY is required for the openai provider".into(),
                    )
                })?;
                let embedder = OpenAiEmbedder::new(
                    key,
                    &self.openai_base_url,
                    &self.embed_model,
                    self.embed_dimensions,
                    self.timeout(),
                )?;
                Ok(Arc::new(embedder))
            }
        }
    }
}

/// Batching, parallelism and retry knobs for the embedding pipeline.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Documents per embedding request and per checkpoint
    #[arg(long, env = "GRIDRAG_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Number of concurrent embedding workers
    #[arg(long, env = "GRIDRAG_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Attempts per batch before it is marked failed
    #[arg(long, env = "GRIDRAG_MAX_ATTEMPTS", default_value_t = 5)]
    pub max_attempts: u32,

    /// Base backoff in milliseconds; doubles per retry up to 2^5
    #[arg(long, env = "GRIDRAG_BACKOFF_MS", default_value_t = 500)]
    pub backoff_ms: u64,
}

impl PipelineArgs {
    /// Converts the parsed flags into a [`PipelineConfig`] with `call_timeout`.
    pub fn pipeline_config(&self, call_timeout: Duration) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.batch_size.max(1),
            workers: self.workers.max(1),
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                base_delay: Duration::from_millis(self.backoff_ms),
                ..RetryPolicy::default()
            },
            call_timeout: Some(call_timeout),
            input: None,
        }
    }
}
