//! Checkpointed batch embedding over a worker pool.
//!
//! Documents are cut into fixed-size batches and each batch gets its ordinal
//! before it is dispatched, so ordinals always reflect input position no
//! matter which worker finishes first. Workers write their own checkpoints;
//! nothing is reordered here because the index builder assembles strictly by
//! ordinal.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::canonical::Document;
use crate::checkpoint::{Checkpoint, CheckpointStore, EmbeddedDocument, RunManifest};
use crate::embedder::{validate_batch, EmbeddingProvider, ProviderError};
use crate::error::{GridError, Result};
use crate::retry::RetryPolicy;

/// Documents per provider call unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Pipeline tuning.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Upper bound on a single provider call; a call that runs longer is a provider failure.
    pub call_timeout: Option<Duration>,
    /// Recorded in the run manifest.
    pub input: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            workers: 1,
            retry: RetryPolicy::default(),
            call_timeout: None,
            input: None,
        }
    }
}

/// Cooperative stop signal, checked once per batch.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop; batches already checkpointed stay intact.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A batch whose documents will be missing from the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub ordinal: u64,
    pub documents: usize,
    pub attempts: u32,
    pub error: String,
}

/// What one pipeline run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    /// Documents pulled from the input.
    pub documents_seen: usize,
    /// Documents embedded and checkpointed by this run.
    pub documents_embedded: usize,
    /// Documents covered by checkpoints from an earlier run.
    pub documents_resumed: usize,
    pub batches_written: usize,
    pub batches_resumed: usize,
    pub failed_batches: Vec<FailedBatch>,
    /// Batches dropped because a stop was requested.
    pub batches_cancelled: usize,
    pub cancelled: bool,
}

impl PipelineReport {
    /// Documents in failed batches.
    pub fn documents_failed(&self) -> usize {
        self.failed_batches.iter().map(|batch| batch.documents).sum()
    }
}

struct BatchTask {
    ordinal: u64,
    documents: Vec<Document>,
}

#[derive(Debug, PartialEq, Eq)]
enum Dispatch {
    Queued,
    Resumed,
    Closed,
}

enum BatchOutcome {
    Written { ordinal: u64, documents: usize },
    Failed(FailedBatch),
    Cancelled { ordinal: u64 },
    Fatal(GridError),
}

/// Embeds documents in batches and checkpoints every completed batch.
pub struct BatchEmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    store: CheckpointStore,
    config: PipelineConfig,
    cancel: CancelFlag,
    /// One token per provider call still running, abandoned ones included.
    call_slots: Sender<()>,
    call_slots_release: Receiver<()>,
}

impl BatchEmbeddingPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: CheckpointStore,
        config: PipelineConfig,
    ) -> Self {
        let (call_slots, call_slots_release) = bounded(config.workers.max(1));
        Self {
            provider,
            store,
            config,
            cancel: CancelFlag::new(),
            call_slots,
            call_slots_release,
        }
    }

    /// Uses an externally owned stop signal.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Consumes `documents`, skipping batches that already have a checkpoint.
    ///
    /// Failed batches are reported, not fatal. An input error or a checkpoint
    /// write failure stops dispatching and is returned once in-flight batches
    /// have settled.
    pub fn run<I>(&self, documents: I) -> Result<PipelineReport>
    where
        I: IntoIterator<Item = Result<Document>>,
    {
        let batch_size = self.config.batch_size.max(1);
        let workers = self.config.workers.max(1);
        self.store.ensure_manifest(&RunManifest {
            batch_size,
            model: self.provider.model_id().to_string(),
            input: self.config.input.clone(),
        })?;
        let completed = self.store.scan()?;
        if !completed.is_empty() {
            info!(
                checkpoints = completed.len(),
                dir = ?self.store.dir(),
                "resuming from existing checkpoints"
            );
        }
        info!(batch_size, workers, model = self.provider.model_id(), "starting embedding pipeline");

        let (task_tx, task_rx) = bounded::<BatchTask>(workers * 2);
        let (result_tx, result_rx) = unbounded::<BatchOutcome>();
        let mut report = PipelineReport::default();
        let mut fatal: Option<GridError> = None;

        thread::scope(|scope| {
            for worker_id in 0..workers {
                let tasks = task_rx.clone();
                let results = result_tx.clone();
                scope.spawn(move || self.worker_loop(worker_id, tasks, results));
            }
            drop(task_rx);
            drop(result_tx);

            let mut batch: Vec<Document> = Vec::with_capacity(batch_size);
            let mut next_ordinal: u64 = 0;
            let mut inflight = 0usize;
            for item in documents {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                match item {
                    Ok(document) => {
                        report.documents_seen += 1;
                        batch.push(document);
                    }
                    Err(err) => {
                        fatal = Some(err);
                        break;
                    }
                }
                if batch.len() >= batch_size {
                    let documents = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                    match self.dispatch(next_ordinal, documents, &completed, &task_tx, &mut report) {
                        Dispatch::Queued => inflight += 1,
                        Dispatch::Resumed => {}
                        Dispatch::Closed => break,
                    }
                    next_ordinal += 1;
                    if drain_ready(&result_rx, &mut report, &mut fatal, &mut inflight) {
                        break;
                    }
                }
            }
            if fatal.is_none()
                && !report.cancelled
                && !batch.is_empty()
                && self.dispatch(next_ordinal, batch, &completed, &task_tx, &mut report)
                    == Dispatch::Queued
            {
                inflight += 1;
            }
            drop(task_tx);

            while inflight > 0 {
                match result_rx.recv_timeout(Duration::from_secs(5)) {
                    Ok(outcome) => {
                        inflight -= 1;
                        settle(outcome, &mut report, &mut fatal);
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        info!(inflight, "waiting on embedding batches");
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        if let Some(err) = fatal {
            return Err(err);
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
        }
        info!(
            embedded = report.documents_embedded,
            resumed = report.documents_resumed,
            failed_batches = report.failed_batches.len(),
            "embedding pipeline finished"
        );
        Ok(report)
    }

    /// Queues one batch unless an earlier run already checkpointed it.
    fn dispatch(
        &self,
        ordinal: u64,
        documents: Vec<Document>,
        completed: &BTreeMap<u64, PathBuf>,
        tasks: &Sender<BatchTask>,
        report: &mut PipelineReport,
    ) -> Dispatch {
        if completed.contains_key(&ordinal) {
            debug!(ordinal, "batch already checkpointed");
            report.batches_resumed += 1;
            report.documents_resumed += documents.len();
            return Dispatch::Resumed;
        }
        debug!(ordinal, documents = documents.len(), "queued embedding batch");
        match tasks.send(BatchTask { ordinal, documents }) {
            Ok(()) => Dispatch::Queued,
            Err(_) => Dispatch::Closed,
        }
    }

    fn worker_loop(&self, worker_id: usize, tasks: Receiver<BatchTask>, results: Sender<BatchOutcome>) {
        for task in tasks.iter() {
            let outcome = if self.cancel.is_cancelled() {
                BatchOutcome::Cancelled {
                    ordinal: task.ordinal,
                }
            } else {
                self.process(worker_id, task)
            };
            if results.send(outcome).is_err() {
                break;
            }
        }
    }

    fn process(&self, worker_id: usize, task: BatchTask) -> BatchOutcome {
        let BatchTask { ordinal, documents } = task;
        let count = documents.len();
        debug!(worker_id, ordinal, documents = count, "embedding batch");
        let texts: Arc<Vec<String>> =
            Arc::new(documents.iter().map(|doc| doc.content.clone()).collect());

        let embedded = self.config.retry.run(|_| {
            let vectors = self.call_provider(&texts)?;
            let dimension = validate_batch(texts.len(), &vectors)?;
            Ok((dimension, vectors))
        });
        let (dimension, vectors) = match embedded {
            Ok(embedded) => embedded,
            Err(exhausted) => {
                warn!(
                    ordinal,
                    documents = count,
                    attempts = exhausted.attempts,
                    error = %exhausted.last,
                    "embedding batch failed; its documents will be missing from the index"
                );
                return BatchOutcome::Failed(FailedBatch {
                    ordinal,
                    documents: count,
                    attempts: exhausted.attempts,
                    error: exhausted.last.to_string(),
                });
            }
        };

        let checkpoint = Checkpoint {
            ordinal,
            model: self.provider.model_id().to_string(),
            dimension,
            entries: vectors
                .into_iter()
                .zip(documents)
                .map(|(embedding, document)| EmbeddedDocument {
                    embedding,
                    document,
                })
                .collect(),
        };
        match self.store.write(&checkpoint) {
            Ok(_) => BatchOutcome::Written {
                ordinal,
                documents: count,
            },
            Err(err) => BatchOutcome::Fatal(err),
        }
    }

    /// Calls the provider, enforcing `call_timeout` when one is set.
    ///
    /// A timed-out call keeps running on its own thread and keeps its slot
    /// until it returns, so at most `workers` provider calls are ever in
    /// flight. A retry that cannot get a slot within the deadline times out
    /// as well.
    fn call_provider(&self, texts: &Arc<Vec<String>>) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let Some(timeout) = self.config.call_timeout else {
            let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
            return self.provider.embed(&inputs);
        };
        let started = Instant::now();
        if self.call_slots.send_timeout((), timeout).is_err() {
            warn!("earlier timed-out embedding calls still hold every slot");
            return Err(ProviderError::Timeout(timeout));
        }
        let (tx, rx) = bounded(1);
        let provider = Arc::clone(&self.provider);
        let texts = Arc::clone(texts);
        let release = self.call_slots_release.clone();
        thread::spawn(move || {
            let inputs: Vec<&str> = texts.iter().map(String::as_str).collect();
            let result = provider.embed(&inputs);
            let _ = release.recv();
            let _ = tx.send(result);
        });
        match rx.recv_timeout(timeout.saturating_sub(started.elapsed())) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(ProviderError::Decode(
                "provider call ended without a response".into(),
            )),
        }
    }
}

fn drain_ready(
    results: &Receiver<BatchOutcome>,
    report: &mut PipelineReport,
    fatal: &mut Option<GridError>,
    inflight: &mut usize,
) -> bool {
    loop {
        match results.try_recv() {
            Ok(outcome) => {
                *inflight = inflight.saturating_sub(1);
                settle(outcome, report, fatal);
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
        }
    }
    fatal.is_some()
}

fn settle(outcome: BatchOutcome, report: &mut PipelineReport, fatal: &mut Option<GridError>) {
    match outcome {
        BatchOutcome::Written { ordinal, documents } => {
            report.batches_written += 1;
            report.documents_embedded += documents;
            info!(
                ordinal,
                embedded = report.documents_embedded,
                "checkpointed embedding batch"
            );
        }
        BatchOutcome::Failed(failed) => report.failed_batches.push(failed),
        BatchOutcome::Cancelled { ordinal } => {
            debug!(ordinal, "batch dropped after stop request");
            report.batches_cancelled += 1;
            report.cancelled = true;
        }
        BatchOutcome::Fatal(err) => {
            if fatal.is_none() {
                *fatal = Some(err);
            }
        }
    }
}
