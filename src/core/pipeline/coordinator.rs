//! Partitioned execution pipeline
//!
//! This module drives a reader, a pool of workers and a writer connected by
//! two bounded channels:
//!
//! ```text
//! reader ──BatchInput──▶ [capacity] ──▶ worker × N ──BatchOutput──▶ [capacity] ──▶ writer
//! ```
//!
//! Full channels block the sending stage, so a slow writer throttles the
//! reader. Every channel operation, reader and writer call and retry delay
//! observes the job's stop signal, which fires on external cancellation or
//! when the job aborts.

use super::batch::{BatchInput, BatchItem, BatchOutput};
use super::progress::JobProgress;
use super::summary::{ItemFailure, JobSummary};
use crate::adapters::{BatchWriter, ItemReader};
use crate::anonymization::{AnonymizerEngine, ProcessingErrorPolicy};
use crate::config::PipelineConfig;
use crate::core::cancellation::CancellationSignal;
use crate::core::retry::{invoke_with_timeout_retry, RetryPolicy};
use crate::domain::{Result, VeilError};
use crate::{log_batch_processing, log_job_complete, log_job_start};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Transforms one item's payload
///
/// Implementations run on worker tasks and must be cheap to share.
pub trait ItemProcessor: Send + Sync {
    /// Transform the payload of `item`
    ///
    /// # Errors
    ///
    /// Errors are subject to the job's failure policy, except
    /// [`VeilError::Processing`] which always aborts the job.
    fn process(&self, item: &BatchItem<String>) -> Result<String>;
}

/// Anonymizes each payload as a JSON document
#[derive(Debug, Clone)]
pub struct DocumentItemProcessor {
    engine: Arc<AnonymizerEngine>,
}

impl DocumentItemProcessor {
    pub fn new(engine: Arc<AnonymizerEngine>) -> Self {
        Self { engine }
    }
}

impl ItemProcessor for DocumentItemProcessor {
    fn process(&self, item: &BatchItem<String>) -> Result<String> {
        let outcome = self.engine.anonymize_str(&item.value, &item.source)?;
        Ok(serde_json::to_string(&outcome.value)?)
    }
}

/// Tuning and failure handling for a pipeline job
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Number of worker tasks
    pub workers: usize,

    /// Items per batch
    pub batch_size: usize,

    /// Batches queued per channel
    pub channel_capacity: usize,

    /// Timeout and retries for reader and writer calls
    pub io_retry: RetryPolicy,

    /// What to do when an item fails
    pub failure_policy: ProcessingErrorPolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            batch_size: 100,
            channel_capacity: 4,
            io_retry: RetryPolicy::default(),
            failure_policy: ProcessingErrorPolicy::Raise,
        }
    }
}

impl PipelineOptions {
    /// Create from the `[pipeline]` section
    pub fn from_config(config: &PipelineConfig, failure_policy: ProcessingErrorPolicy) -> Self {
        Self {
            workers: config.workers,
            batch_size: config.batch_size,
            channel_capacity: config.channel_capacity,
            io_retry: RetryPolicy::new(
                Duration::from_secs(config.io_timeout_seconds),
                config.max_retries,
                Duration::from_millis(config.retry_delay_ms),
            ),
            failure_policy,
        }
    }

    /// Validate the options
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Configuration`] if any size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(VeilError::Configuration(
                "pipeline workers must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(VeilError::Configuration(
                "pipeline batch_size must be at least 1".to_string(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(VeilError::Configuration(
                "pipeline channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// State shared by every stage of one job
struct JobState {
    progress: Arc<JobProgress>,
    failures: Mutex<Vec<ItemFailure>>,
    abort: Mutex<Option<(String, VeilError)>>,
    stop_tx: watch::Sender<bool>,
}

impl JobState {
    fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Record the first fatal error and stop every stage
    fn abort(&self, locator: impl Into<String>, error: VeilError) {
        let locator = locator.into();
        {
            let mut slot = self.abort.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                tracing::error!(locator = %locator, error = %error, "Aborting job");
                *slot = Some((locator, error));
            }
        }
        self.stop();
    }

    fn record_failure(&self, failure: ItemFailure) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure);
    }

    fn take_abort(&self) -> Option<(String, VeilError)> {
        self.abort
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn take_failures(&self) -> Vec<ItemFailure> {
        std::mem::take(&mut *self.failures.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Reader → workers → writer job runner
///
/// # Example
///
/// ```rust,no_run
/// use veil::adapters::ndjson::{NdjsonReader, NdjsonWriter};
/// use veil::anonymization::{AnonymizerEngine, ProcessorRegistry};
/// use veil::core::cancellation::CancellationSignal;
/// use veil::core::pipeline::{DocumentItemProcessor, PartitionedExecutionPipeline, PipelineOptions};
/// use std::sync::Arc;
///
/// # async fn example() -> veil::domain::Result<()> {
/// let engine = AnonymizerEngine::from_file("rules.json", &ProcessorRegistry::new())?;
/// let pipeline = PartitionedExecutionPipeline::new(
///     PipelineOptions::default(),
///     Arc::new(DocumentItemProcessor::new(Arc::new(engine))),
///     CancellationSignal::never(),
/// )?;
///
/// let reader = NdjsonReader::open("patients.ndjson").await?;
/// let writer = NdjsonWriter::create("patients.anon.ndjson").await?;
/// let summary = pipeline.run(reader, writer).await?;
/// summary.log_summary();
/// # Ok(())
/// # }
/// ```
pub struct PartitionedExecutionPipeline {
    options: PipelineOptions,
    processor: Arc<dyn ItemProcessor>,
    cancel: CancellationSignal,
    progress: Arc<JobProgress>,
}

impl PartitionedExecutionPipeline {
    /// Create a pipeline
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Configuration`] if the options are invalid.
    pub fn new(
        options: PipelineOptions,
        processor: Arc<dyn ItemProcessor>,
        cancel: CancellationSignal,
    ) -> Result<Self> {
        options.validate()?;
        let progress = Arc::new(JobProgress::new(options.workers));
        Ok(Self {
            options,
            processor,
            cancel,
            progress,
        })
    }

    /// Live counters, readable while [`run`](Self::run) executes
    pub fn progress(&self) -> Arc<JobProgress> {
        self.progress.clone()
    }

    /// Run the job to completion, cancellation or abort
    ///
    /// A cancelled job returns its summary with `cancelled` set and nothing
    /// committed.
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::JobAborted`] with the locator of the failing item
    /// (or `reader`, `writer`, `commit`) when the job aborts.
    pub async fn run<R, W>(self, reader: R, writer: W) -> Result<JobSummary>
    where
        R: ItemReader + 'static,
        W: BatchWriter + 'static,
    {
        let job_id = Uuid::new_v4();
        let start = Instant::now();
        log_job_start!(job_id, self.options.workers, self.options.batch_size);

        let (stop_tx, stop_rx) = watch::channel(false);
        let stop = CancellationSignal::new(stop_rx);
        let state = Arc::new(JobState {
            progress: self.progress.clone(),
            failures: Mutex::new(Vec::new()),
            abort: Mutex::new(None),
            stop_tx,
        });

        let forwarder = {
            let external = self.cancel.clone();
            let state = state.clone();
            tokio::spawn(async move {
                external.cancelled().await;
                tracing::warn!("Cancellation requested, stopping job");
                state.stop();
            })
        };

        let (input_tx, input_rx) = mpsc::channel(self.options.channel_capacity);
        let (output_tx, output_rx) = mpsc::channel(self.options.channel_capacity);
        let input_rx = Arc::new(tokio::sync::Mutex::new(input_rx));
        let writer = Arc::new(tokio::sync::Mutex::new(writer));

        let reader_handle = tokio::spawn(read_stage(
            reader,
            input_tx,
            state.clone(),
            stop.clone(),
            self.options.batch_size,
            self.options.io_retry,
        ));

        let mut worker_handles = Vec::with_capacity(self.options.workers);
        for worker_id in 0..self.options.workers {
            worker_handles.push(tokio::spawn(work_stage(
                worker_id,
                input_rx.clone(),
                output_tx.clone(),
                self.processor.clone(),
                self.options.failure_policy,
                state.clone(),
                stop.clone(),
            )));
        }
        drop(output_tx);

        let writer_handle = tokio::spawn(write_stage(
            writer.clone(),
            output_rx,
            state.clone(),
            stop.clone(),
            self.options.io_retry,
        ));

        if let Err(e) = reader_handle.await {
            state.abort("reader", VeilError::Processing(format!("reader task failed: {e}")));
        }
        for handle in worker_handles {
            if let Err(e) = handle.await {
                state.abort("worker", VeilError::Processing(format!("worker task failed: {e}")));
            }
        }
        if let Err(e) = writer_handle.await {
            state.abort("writer", VeilError::Processing(format!("writer task failed: {e}")));
        }
        forwarder.abort();

        // Batches still queued when the stages stopped
        {
            let mut rx = input_rx.lock().await;
            rx.close();
            while let Ok(batch) = rx.try_recv() {
                state.progress.record_dropped(batch.len() as u64);
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let mut abort = state.take_abort();
        let mut committed = false;

        if abort.is_none() && !cancelled {
            let outcome = invoke_with_timeout_retry(
                || {
                    let writer = writer.clone();
                    async move {
                        let result = writer.lock().await.commit().await;
                        result
                    }
                },
                &self.options.io_retry,
                VeilError::is_retryable,
                &self.cancel,
            )
            .await;

            match outcome {
                Ok(()) => committed = true,
                Err(VeilError::Cancelled(_)) => {}
                Err(e) => abort = Some(("commit".to_string(), e)),
            }
        }

        let snapshot = self.progress.snapshot();
        let mut summary = JobSummary::new(job_id).with_duration(start.elapsed());
        summary.processed = snapshot.processed;
        summary.skipped = snapshot.skipped;
        summary.failed = snapshot.failed;
        summary.consumed_batches = snapshot.consumed_batches;
        summary.written = snapshot.written;
        summary.dropped = snapshot.dropped;
        summary.cancelled = self.cancel.is_cancelled();
        summary.committed = committed;
        for failure in state.take_failures() {
            summary.add_failure(failure);
        }

        summary.log_summary();
        log_job_complete!(job_id, summary.processed, summary.duration);

        match abort {
            Some((locator, source)) => Err(VeilError::JobAborted {
                locator,
                source: Box::new(source),
            }),
            None => Ok(summary),
        }
    }
}

/// Group items into batches and feed the input channel
async fn read_stage<R: ItemReader + 'static>(
    reader: R,
    tx: mpsc::Sender<BatchInput<String>>,
    state: Arc<JobState>,
    stop: CancellationSignal,
    batch_size: usize,
    retry: RetryPolicy,
) {
    let reader = Arc::new(tokio::sync::Mutex::new(reader));
    let mut sequence = 0u64;
    let mut items = Vec::with_capacity(batch_size);

    loop {
        let next = invoke_with_timeout_retry(
            || {
                let reader = reader.clone();
                async move {
                    let item = reader.lock().await.next().await;
                    item
                }
            },
            &retry,
            VeilError::is_retryable,
            &stop,
        )
        .await;

        let exhausted = match next {
            Ok(Some(item)) => {
                state.progress.record_read();
                items.push(item);
                if items.len() < batch_size {
                    continue;
                }
                false
            }
            Ok(None) => true,
            Err(e) => {
                state.progress.record_dropped(items.len() as u64);
                if !matches!(e, VeilError::Cancelled(_)) {
                    state.abort("reader", e);
                }
                break;
            }
        };

        if !items.is_empty() {
            let batch = BatchInput::new(
                sequence,
                std::mem::replace(&mut items, Vec::with_capacity(batch_size)),
            );
            let size = batch.len() as u64;
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    state.progress.record_dropped(size);
                    break;
                }
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        state.progress.record_dropped(size);
                        break;
                    }
                }
            }
            tracing::debug!(sequence, items = size, "Batch queued");
            sequence += 1;
        }

        if exhausted {
            break;
        }
    }
}

/// Take batches from the shared receiver, transform them, forward the output
async fn work_stage(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<BatchInput<String>>>>,
    tx: mpsc::Sender<BatchOutput<String>>,
    processor: Arc<dyn ItemProcessor>,
    policy: ProcessingErrorPolicy,
    state: Arc<JobState>,
    stop: CancellationSignal,
) {
    let detail = state.progress.worker(worker_id);

    loop {
        let batch = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = stop.cancelled() => None,
                batch = rx.recv() => batch,
            }
        };
        let Some(batch) = batch else {
            break;
        };
        detail.record_consumed();

        let sequence = batch.sequence;
        let total = batch.len();
        log_batch_processing!(sequence, total);

        let mut outputs = Vec::with_capacity(total);
        let mut stopped = false;
        for (position, item) in batch.items.into_iter().enumerate() {
            if stop.is_cancelled() {
                state.progress.record_dropped((total - position) as u64);
                stopped = true;
                break;
            }

            if item.value.trim().is_empty() {
                detail.record_skipped();
                tracing::debug!(worker_id, locator = %item.source, "Skipping blank item");
                continue;
            }

            match processor.process(&item) {
                Ok(value) => {
                    detail.record_processed();
                    outputs.push(item.with_value(value));
                }
                Err(error) => {
                    detail.record_failed();
                    if error.is_fatal() || policy == ProcessingErrorPolicy::Raise {
                        state.progress.record_dropped((total - position - 1) as u64);
                        state.abort(item.source, error);
                        stopped = true;
                        break;
                    }
                    tracing::warn!(
                        worker_id,
                        locator = %item.source,
                        error = %error,
                        policy = %policy,
                        "Item failed, continuing"
                    );
                    state.record_failure(ItemFailure::new(item.source, &error));
                }
            }
        }

        if stopped {
            state.progress.record_dropped(outputs.len() as u64);
            break;
        }

        let output = BatchOutput::new(sequence, outputs);
        let size = output.len() as u64;
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                state.progress.record_dropped(size);
                break;
            }
            sent = tx.send(output) => {
                if sent.is_err() {
                    state.progress.record_dropped(size);
                    break;
                }
            }
        }
    }

    tracing::debug!(
        worker_id,
        processed = detail.processed(),
        failed = detail.failed(),
        "Worker finished"
    );
}

/// Hand every output batch to the writer
async fn write_stage<W: BatchWriter + 'static>(
    writer: Arc<tokio::sync::Mutex<W>>,
    mut rx: mpsc::Receiver<BatchOutput<String>>,
    state: Arc<JobState>,
    stop: CancellationSignal,
    retry: RetryPolicy,
) {
    loop {
        let batch = tokio::select! {
            biased;
            _ = stop.cancelled() => None,
            batch = rx.recv() => batch,
        };
        let Some(batch) = batch else {
            break;
        };

        let size = batch.len() as u64;
        let written = invoke_with_timeout_retry(
            || {
                let writer = writer.clone();
                let batch = batch.clone();
                async move {
                    let written = writer.lock().await.write_batch(batch).await;
                    written
                }
            },
            &retry,
            VeilError::is_retryable,
            &stop,
        )
        .await;

        match written {
            Ok(()) => state.progress.record_written(size),
            Err(e) => {
                state.progress.record_dropped(size);
                if !matches!(e, VeilError::Cancelled(_)) {
                    state.abort("writer", e);
                }
                break;
            }
        }
    }

    rx.close();
    while let Ok(batch) = rx.try_recv() {
        state.progress.record_dropped(batch.len() as u64);
    }
}
