//! Question answering over transmission line catalogs, backed by exact vector search.
//!
//! The ingest side streams a large GeoJSON catalog, turns each feature into a
//! [`Document`], embeds documents in checkpointed batches and merges the
//! checkpoints into a generation-swapped [`FlatIndex`]. The query side loads
//! that generation into a shared [`IndexContext`] and ranks documents with a
//! [`RetrievalEngine`].

pub mod answer;
pub mod builder;
pub mod canonical;
pub mod checkpoint;
pub mod embedder;
pub mod error;
pub mod index;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod retrieval;
pub mod retry;
pub mod settings;
pub mod store;
pub mod telemetry;

pub use answer::{answer, Answer, AnswerSynthesizer};
pub use builder::{BuildOptions, BuildReport, IndexBuilder};
pub use canonical::{canonicalize, Document};
pub use checkpoint::{Checkpoint, CheckpointStore, EmbeddedDocument, RunManifest};
pub use embedder::{EmbeddingProvider, HashingEmbedder, OpenAiEmbedder, ProviderError};
pub use error::{GridError, Result};
pub use index::{FlatIndex, Neighbor};
pub use ingest::{IngestConfig, IngestSummary};
pub use pipeline::{BatchEmbeddingPipeline, CancelFlag, FailedBatch, PipelineConfig, PipelineReport};
pub use record::{FieldValue, Record, VOLTAGE_NOT_APPLICABLE};
pub use retrieval::{IndexContext, RetrievalEngine, RetrievedDocument};
pub use retry::RetryPolicy;
pub use store::{IndexLayout, PublishedIndex};
