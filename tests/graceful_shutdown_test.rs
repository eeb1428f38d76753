//! Integration tests for cooperative cancellation
//!
//! These tests verify that:
//! - Shutdown signals are properly propagated to every stage
//! - A cancelled job returns its summary and commits nothing
//! - Every item read is accounted for as written, skipped, failed or dropped
//! - Staged output is removed when a job does not commit

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use veil::adapters::ndjson::NdjsonWriter;
use veil::adapters::{BatchWriter, ItemReader, SourceItem};
use veil::anonymization::ProcessingErrorPolicy;
use veil::core::cancellation::CancellationSignal;
use veil::core::pipeline::{
    BatchItem, BatchOutput, ItemProcessor, PartitionedExecutionPipeline, PipelineOptions,
};
use veil::core::retry::{invoke_with_timeout_retry, RetryPolicy};
use veil::domain::{Result, VeilError};

/// Produces items forever with a short pause between them
struct EndlessReader {
    next: u64,
    pause: Duration,
}

#[async_trait]
impl ItemReader for EndlessReader {
    async fn next(&mut self) -> Result<Option<SourceItem>> {
        tokio::time::sleep(self.pause).await;
        self.next += 1;
        Ok(Some(BatchItem::new(
            format!("item-{}", self.next),
            format!("out-{}", self.next),
            self.next.to_string(),
        )))
    }
}

#[derive(Clone, Default)]
struct CountingWriter {
    written: Arc<AtomicU64>,
    commits: Arc<AtomicU64>,
}

#[async_trait]
impl BatchWriter for CountingWriter {
    async fn write_batch(&mut self, batch: BatchOutput<String>) -> Result<()> {
        self.written.fetch_add(batch.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Echo;

impl ItemProcessor for Echo {
    fn process(&self, item: &BatchItem<String>) -> Result<String> {
        Ok(item.value.clone())
    }
}

fn options() -> PipelineOptions {
    PipelineOptions {
        workers: 2,
        batch_size: 4,
        channel_capacity: 2,
        io_retry: RetryPolicy::new(Duration::from_secs(5), 0, Duration::ZERO),
        failure_policy: ProcessingErrorPolicy::Raise,
    }
}

#[tokio::test]
async fn test_shutdown_signal_propagation() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let first = CancellationSignal::new(shutdown_rx.clone());
    let second = CancellationSignal::from(shutdown_rx);

    assert!(!first.is_cancelled());
    assert!(!second.is_cancelled());

    shutdown_tx.send(true).unwrap();

    assert!(first.is_cancelled());
    assert!(second.is_cancelled());
    tokio::time::timeout(Duration::from_secs(1), second.cancelled())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_cancelled_job_returns_summary_without_commit() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writer = CountingWriter::default();
    let pipeline = PartitionedExecutionPipeline::new(
        options(),
        Arc::new(Echo),
        CancellationSignal::new(shutdown_rx),
    )
    .unwrap();
    let progress = pipeline.progress();

    let job = tokio::spawn(pipeline.run(
        EndlessReader {
            next: 0,
            pause: Duration::from_millis(1),
        },
        writer.clone(),
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), job)
        .await
        .expect("job did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert!(summary.cancelled);
    assert!(!summary.committed);
    assert_eq!(summary.exit_code(), 130);
    assert_eq!(writer.commits.load(Ordering::SeqCst), 0);

    let snapshot = progress.snapshot();
    assert!(snapshot.read > 0);
    assert_eq!(
        snapshot.read,
        snapshot.written + snapshot.dropped + snapshot.skipped + snapshot.failed
    );
    assert_eq!(snapshot.written, writer.written.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_cancellation_before_start_reads_nothing() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();

    let writer = CountingWriter::default();
    let pipeline = PartitionedExecutionPipeline::new(
        options(),
        Arc::new(Echo),
        CancellationSignal::new(shutdown_rx),
    )
    .unwrap();

    let summary = pipeline
        .run(
            EndlessReader {
                next: 0,
                pause: Duration::ZERO,
            },
            writer.clone(),
        )
        .await
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total(), 0);
    assert_eq!(writer.written.load(Ordering::SeqCst), 0);
    assert_eq!(writer.commits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_ndjson_job_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.ndjson");
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = PartitionedExecutionPipeline::new(
        options(),
        Arc::new(Echo),
        CancellationSignal::new(shutdown_rx),
    )
    .unwrap();
    let writer = NdjsonWriter::create(&output).await.unwrap();
    assert!(dir.path().join("out.ndjson.partial").exists());

    let job = tokio::spawn(pipeline.run(
        EndlessReader {
            next: 0,
            pause: Duration::from_millis(1),
        },
        writer,
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let summary = job.await.unwrap().unwrap();
    assert!(summary.cancelled);
    assert!(!output.exists());
    assert!(!dir.path().join("out.ndjson.partial").exists());
}

#[tokio::test]
async fn test_retry_delay_observes_cancellation() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cancel = CancellationSignal::new(shutdown_rx);
    let attempts = Arc::new(AtomicU64::new(0));
    let policy = RetryPolicy::new(Duration::from_secs(5), 5, Duration::from_secs(60));

    let counter = attempts.clone();
    let retry = tokio::spawn(async move {
        invoke_with_timeout_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(VeilError::Io("connection reset".to_string()))
                }
            },
            &policy,
            VeilError::is_retryable,
            &cancel,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), retry)
        .await
        .expect("retry delay ignored cancellation")
        .unwrap();
    assert!(matches!(result, Err(VeilError::Cancelled(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}
