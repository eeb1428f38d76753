//! Bulk command implementation
//!
//! This module implements the `bulk` command, which runs the batch pipeline
//! over a folder of JSON documents or an NDJSON file.

use super::{build_engine, load_app_config, rules_path};
use crate::adapters::folder::{FolderReader, FolderWriter};
use crate::adapters::ndjson::{NdjsonReader, NdjsonWriter};
use crate::core::cancellation::CancellationSignal;
use crate::core::pipeline::{
    DocumentItemProcessor, JobProgress, JobSummary, PartitionedExecutionPipeline, PipelineOptions,
};
use crate::domain::{Result, VeilError};
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Arguments for the bulk command
#[derive(Args, Debug)]
pub struct BulkArgs {
    /// Input directory or NDJSON file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory or NDJSON file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Rule file (overrides anonymization.rules_file)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,

    /// Worker tasks (overrides pipeline.workers)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Items per batch (overrides pipeline.batch_size)
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Include subdirectories of a folder input
    #[arg(long)]
    pub recursive: bool,
}

/// Shape of the bulk input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Folder,
    Ndjson,
}

fn input_kind(input: &Path) -> Result<InputKind> {
    if input.is_dir() {
        return Ok(InputKind::Folder);
    }

    let extension = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "ndjson" | "jsonl" => Ok(InputKind::Ndjson),
        _ => Err(VeilError::Configuration(format!(
            "Bulk input must be a directory or an .ndjson file: {}",
            input.display()
        ))),
    }
}

impl BulkArgs {
    /// Execute the bulk command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!(input = %self.input.display(), "Starting bulk command");

        let mut config = match load_app_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Failed to load configuration: {e}");
                return Ok(e.exit_code());
            }
        };

        // Apply CLI overrides
        if let Some(workers) = self.workers {
            tracing::info!(workers, "Overriding worker count from CLI");
            config.pipeline.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            tracing::info!(batch_size, "Overriding batch size from CLI");
            config.pipeline.batch_size = batch_size;
        }
        if let Err(e) = config.validate() {
            tracing::error!(error = %e, "Configuration validation failed");
            eprintln!("Configuration validation failed: {e}");
            return Ok(2);
        }

        let kind = match input_kind(&self.input) {
            Ok(kind) => kind,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(e.exit_code());
            }
        };

        let rules = rules_path(&config, self.rules.as_ref());
        let engine = match build_engine(&config, &rules) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(error = %e, rules = %rules.display(), "Invalid rule configuration");
                eprintln!("❌ Invalid rule configuration: {e}");
                return Ok(e.exit_code());
            }
        };

        let options =
            PipelineOptions::from_config(&config.pipeline, engine.configuration().error_policy);
        let pipeline = match PartitionedExecutionPipeline::new(
            options,
            Arc::new(DocumentItemProcessor::new(Arc::new(engine))),
            CancellationSignal::new(shutdown_signal),
        ) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("❌ {e}");
                return Ok(e.exit_code());
            }
        };

        println!("🚀 Starting bulk anonymization...");
        println!();

        let reporter = spawn_progress_reporter(pipeline.progress(), Duration::from_secs(10));
        let result = match kind {
            InputKind::Folder => self.run_folder(pipeline).await,
            InputKind::Ndjson => self.run_ndjson(pipeline).await,
        };
        reporter.abort();

        match result {
            Ok(summary) => Ok(report(&summary)),
            Err(e) => {
                tracing::error!(error = %e, "Bulk anonymization failed");
                eprintln!("❌ Bulk anonymization failed: {e}");
                Ok(e.exit_code())
            }
        }
    }

    async fn run_folder(&self, pipeline: PartitionedExecutionPipeline) -> Result<JobSummary> {
        let reader = FolderReader::open(&self.input, self.recursive).await?;
        pipeline.run(reader, FolderWriter::new(&self.output)).await
    }

    async fn run_ndjson(&self, pipeline: PartitionedExecutionPipeline) -> Result<JobSummary> {
        let reader = NdjsonReader::open(&self.input).await?;
        let writer = NdjsonWriter::create(&self.output).await?;
        pipeline.run(reader, writer).await
    }
}

/// Log live counters until aborted
fn spawn_progress_reporter(
    progress: Arc<JobProgress>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let snapshot = progress.snapshot();
            tracing::info!(
                read = snapshot.read,
                processed = snapshot.processed,
                failed = snapshot.failed,
                written = snapshot.written,
                "Job progress"
            );
        }
    })
}

/// Print the summary and pick the exit code
fn report(summary: &JobSummary) -> i32 {
    println!();
    println!("📊 Job Summary:");
    println!("  Job ID: {}", summary.job_id);
    println!("  Processed: {}", summary.processed);
    println!("  Skipped: {}", summary.skipped);
    println!("  Failed: {}", summary.failed);
    println!("  Written: {}", summary.written);
    println!("  Batches: {}", summary.consumed_batches);
    println!("  Duration: {:.2}s", summary.duration.as_secs_f64());
    println!("  Success Rate: {:.2}%", summary.success_rate());
    println!();

    if !summary.failures.is_empty() {
        println!("⚠️  Failed items:");
        for (i, failure) in summary.failures.iter().enumerate() {
            if i < 10 {
                println!("  - {}: {}", failure.locator, failure.message);
            }
        }
        if summary.failures.len() > 10 {
            println!("  ... and {} more failures", summary.failures.len() - 10);
        }
        println!();
    }

    let exit_code = summary.exit_code();
    match exit_code {
        130 => {
            println!("⚠️  Job cancelled. No output was committed.");
            println!("   Dropped items: {}", summary.dropped);
        }
        0 => println!("✅ Bulk anonymization completed successfully!"),
        _ => println!("⚠️  Bulk anonymization completed with skipped or failed items"),
    }
    exit_code
}
