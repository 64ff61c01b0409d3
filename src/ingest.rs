//! End-to-end ingest: stream, canonicalize, embed, checkpoint, build.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use feature_stream::{FeatureStream, StreamOptions};
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{BuildOptions, BuildReport, IndexBuilder};
use crate::canonical::{canonicalize, Document};
use crate::checkpoint::CheckpointStore;
use crate::embedder::EmbeddingProvider;
use crate::error::{GridError, Result};
use crate::pipeline::{BatchEmbeddingPipeline, CancelFlag, FailedBatch, PipelineConfig};
use crate::record::Record;
use crate::store::IndexLayout;

/// Everything one ingest run needs besides the provider.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub input: PathBuf,
    pub checkpoint_dir: PathBuf,
    pub index_dir: PathBuf,
    /// Root member holding the feature array; `None` for a bare array.
    pub array_key: Option<String>,
    /// Only process the first N features.
    pub max_features: Option<usize>,
    pub pipeline: PipelineConfig,
    pub build: BuildOptions,
    /// Stop after checkpointing; leave the merge for a later run.
    pub skip_build: bool,
}

impl IngestConfig {
    /// Config with default tuning for `input`, placing artifacts under `work_dir`.
    pub fn new(input: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            input: input.into(),
            checkpoint_dir: work_dir.join("checkpoints"),
            index_dir: work_dir.join("index"),
            array_key: StreamOptions::default().array_key,
            max_features: None,
            pipeline: PipelineConfig::default(),
            build: BuildOptions::default(),
            skip_build: false,
        }
    }

    fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            array_key: self.array_key.clone(),
            limit: self.max_features,
            ..StreamOptions::default()
        }
    }
}

/// Counts reported at the end of an ingest.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestSummary {
    /// Array elements encountered, parsed or not.
    pub records_seen: usize,
    pub records_parsed: usize,
    /// Elements skipped because they did not parse.
    pub records_skipped: usize,
    pub documents_embedded: usize,
    /// Documents already checkpointed by an interrupted earlier run.
    pub documents_resumed: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub cancelled: bool,
    pub build: Option<BuildReport>,
}

/// Runs the full ingest for `config.input`.
pub fn run(config: &IngestConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<IngestSummary> {
    run_with_cancel(config, provider, CancelFlag::new())
}

/// [`run`] with a caller-owned stop signal.
pub fn run_with_cancel(
    config: &IngestConfig,
    provider: Arc<dyn EmbeddingProvider>,
    cancel: CancelFlag,
) -> Result<IngestSummary> {
    info!(input = ?config.input, "starting ingest");
    let stream: FeatureStream<_, Record> = FeatureStream::open(&config.input, config.stream_options())?;
    let mut pipeline_config = config.pipeline.clone();
    pipeline_config.input = Some(config.input.clone());
    run_stream(stream, config, pipeline_config, provider, cancel)
}

/// Ingests from any buffered reader; `config.input` is only used for reporting.
pub fn run_reader<R: BufRead>(
    reader: R,
    config: &IngestConfig,
    provider: Arc<dyn EmbeddingProvider>,
) -> Result<IngestSummary> {
    let stream: FeatureStream<R, Record> = FeatureStream::new(reader, config.stream_options());
    run_stream(stream, config, config.pipeline.clone(), provider, CancelFlag::new())
}

fn run_stream<R: BufRead>(
    mut stream: FeatureStream<R, Record>,
    config: &IngestConfig,
    pipeline_config: PipelineConfig,
    provider: Arc<dyn EmbeddingProvider>,
    cancel: CancelFlag,
) -> Result<IngestSummary> {
    let checkpoints = CheckpointStore::open(&config.checkpoint_dir)?;
    let pipeline = BatchEmbeddingPipeline::new(provider, checkpoints.clone(), pipeline_config)
        .with_cancel_flag(cancel);

    let documents = stream
        .by_ref()
        .map(|record| -> Result<Document> { Ok(canonicalize(&record?)) });
    let report = pipeline.run(documents)?;
    let stats = stream.stats();
    if stats.skipped > 0 {
        warn!(skipped = stats.skipped, "some features could not be parsed and were skipped");
    }

    let mut summary = IngestSummary {
        records_seen: stats.seen(),
        records_parsed: stats.emitted,
        records_skipped: stats.skipped,
        documents_embedded: report.documents_embedded,
        documents_resumed: report.documents_resumed,
        failed_batches: report.failed_batches,
        cancelled: report.cancelled,
        build: None,
    };

    if summary.cancelled {
        info!("ingest cancelled; completed checkpoints kept for resume");
        return Ok(summary);
    }
    if config.skip_build {
        info!(dir = ?config.checkpoint_dir, "skipping index build");
        return Ok(summary);
    }
    if summary.documents_embedded + summary.documents_resumed == 0 {
        return Err(GridError::Configuration(
            "no documents were embedded; nothing to index".into(),
        ));
    }
    let layout = IndexLayout::new(&config.index_dir);
    let builder = IndexBuilder::new(checkpoints, layout, config.build);
    summary.build = Some(builder.build()?);
    Ok(summary)
}
