//! Error types shared across the ingest, build and query stages.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::embedder::ProviderError;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, GridError>;

/// Fatal failures surfaced to callers.
///
/// Recoverable faults (a malformed record, a failed batch, a dangling index
/// position) are logged and counted where they happen and never show up here.
#[derive(Debug, Error)]
pub enum GridError {
    /// Durable read/write failure on a named artifact.
    #[error("failed to {operation} {artifact:?}: {source}")]
    Storage {
        artifact: PathBuf,
        operation: &'static str,
        #[source]
        source: io::Error,
    },
    /// An artifact was readable but its JSON content was not.
    #[error("failed to {operation} {artifact:?}: {source}")]
    Serialization {
        artifact: PathBuf,
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },
    /// The persisted index file is not a valid flat index.
    #[error("invalid index artifact {artifact:?}: {reason}")]
    IndexFormat { artifact: PathBuf, reason: String },
    /// Reading the input document failed.
    #[error(transparent)]
    Stream(#[from] feature_stream::StreamError),
    /// The embedding provider failed outside the retrying pipeline.
    #[error("embedding provider failed: {0}")]
    Provider(#[from] ProviderError),
    /// A vector does not have the dimension the index was built with.
    #[error("dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Settings or persisted state disagree with each other.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The caller passed an unusable query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    /// The external answer generator failed.
    #[error("answer synthesis failed: {0}")]
    Synthesis(#[source] anyhow::Error),
}

impl GridError {
    pub(crate) fn storage(
        artifact: impl AsRef<Path>,
        operation: &'static str,
    ) -> impl FnOnce(io::Error) -> GridError {
        let artifact = artifact.as_ref().to_path_buf();
        move |source| GridError::Storage {
            artifact,
            operation,
            source,
        }
    }

    pub(crate) fn serialization(
        artifact: impl AsRef<Path>,
        operation: &'static str,
    ) -> impl FnOnce(serde_json::Error) -> GridError {
        let artifact = artifact.as_ref().to_path_buf();
        move |source| GridError::Serialization {
            artifact,
            operation,
            source,
        }
    }

    /// Whether this error is a configuration fault rather than a storage fault.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            GridError::Configuration(_) | GridError::DimensionMismatch { .. }
        )
    }
}
