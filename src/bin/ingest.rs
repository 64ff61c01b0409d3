use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use gridrag::ingest::{self, IngestConfig, IngestSummary};
use gridrag::settings::{EmbedderArgs, PipelineArgs};
use gridrag::{BuildOptions, CancelFlag, IndexContext, IndexLayout};

#[derive(Parser, Debug)]
#[command(
    name = "gridrag-ingest",
    about = "Embed a transmission line GeoJSON catalog and publish a vector index"
)]
struct IngestCli {
    /// GeoJSON FeatureCollection (or bare feature array) to ingest
    #[arg(long, env = "GRIDRAG_INPUT")]
    input: PathBuf,

    /// Working directory; checkpoints and index default to subdirectories of it
    #[arg(long, env = "GRIDRAG_WORK_DIR", default_value = "gridrag-data")]
    work_dir: PathBuf,

    /// Override the checkpoint directory
    #[arg(long, env = "GRIDRAG_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Override the index directory
    #[arg(long, env = "GRIDRAG_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// Root member holding the features
    #[arg(long, default_value = "features")]
    key: String,

    /// Treat the whole document as the feature array
    #[arg(long, default_value_t = false)]
    root_array: bool,

    /// Only ingest the first N features
    #[arg(long)]
    max_features: Option<usize>,

    /// Stop after checkpointing; run again without this flag to merge
    #[arg(long, default_value_t = false)]
    skip_build: bool,

    /// Leave checkpoints in place after the index is published
    #[arg(long, default_value_t = false)]
    keep_checkpoints: bool,

    /// Number of sample documents to print after the build
    #[arg(long, default_value_t = 3)]
    samples: usize,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

fn main() -> Result<()> {
    gridrag::telemetry::init_tracing();
    let cli = IngestCli::parse();

    let mut config = IngestConfig::new(&cli.input, &cli.work_dir);
    if let Some(dir) = &cli.checkpoint_dir {
        config.checkpoint_dir = dir.clone();
    }
    if let Some(dir) = &cli.index_dir {
        config.index_dir = dir.clone();
    }
    config.array_key = (!cli.root_array).then(|| cli.key.clone());
    config.max_features = cli.max_features;
    config.skip_build = cli.skip_build;
    config.build = BuildOptions {
        keep_checkpoints: cli.keep_checkpoints,
    };
    config.pipeline = cli.pipeline.pipeline_config(cli.embedder.timeout());

    let provider = cli
        .embedder
        .build_provider()
        .context("failed to configure embedding provider")?;
    eprintln!(
        "ingesting {:?} with {} (batch size {}, {} worker(s))...",
        config.input,
        provider.model_id(),
        config.pipeline.batch_size,
        config.pipeline.workers
    );
    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("stop requested; finishing in-flight batches...");
        on_signal.cancel();
    })
    .context("failed to install Ctrl-C handler")?;

    let summary = ingest::run_with_cancel(&config, provider, cancel)
        .with_context(|| format!("ingest of {:?} failed", config.input))?;
    print_summary(&summary);

    if summary.build.is_some() {
        verify(&config, cli.samples)?;
    }
    if !summary.failed_batches.is_empty() {
        bail!(
            "{} batch(es) failed to embed; their documents are missing from the index",
            summary.failed_batches.len()
        );
    }
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!(
        "records: {} seen, {} parsed, {} skipped",
        summary.records_seen, summary.records_parsed, summary.records_skipped
    );
    println!(
        "documents: {} embedded, {} resumed from checkpoints",
        summary.documents_embedded, summary.documents_resumed
    );
    for failed in &summary.failed_batches {
        println!(
            "failed batch {:08}: {} document(s) after {} attempt(s): {}",
            failed.ordinal, failed.documents, failed.attempts, failed.error
        );
    }
    if summary.cancelled {
        println!("run was cancelled; completed checkpoints kept for resume");
    }
    match &summary.build {
        Some(build) => println!(
            "published generation {} with {} vectors (dimension {}, model {}, {} checkpoint(s))",
            build.generation, build.vectors, build.dimension, build.model, build.checkpoints_merged
        ),
        None => println!("index build skipped"),
    }
}

/// Reloads what was just published and prints a few documents.
fn verify(config: &IngestConfig, samples: usize) -> Result<()> {
    let context = IndexContext::load(&IndexLayout::new(&config.index_dir))
        .context("published index failed to reload")?;
    println!(
        "verified generation {}: {} vectors, {} documents, dimension {}",
        context.generation().unwrap_or_default(),
        context.len(),
        context.metadata().len(),
        context.dimension()
    );
    for document in context.metadata().iter().take(samples) {
        println!(
            "  {} | voltage {} | owner {}",
            document.id, document.voltage, document.owner
        );
    }
    Ok(())
}
