//! Core job orchestration for Veil.
//!
//! This module contains the machinery that drives the anonymization engine
//! over large datasets.
//!
//! # Modules
//!
//! - [`pipeline`] - Reader, worker pool and writer connected by bounded channels
//! - [`retry`] - Timeout and retry guard for reader and writer calls
//! - [`cancellation`] - Shutdown signal shared by every stage
//!
//! # Job Workflow
//!
//! 1. **Read**: The reader groups source items into batches
//! 2. **Transform**: Workers anonymize each item, applying the failure policy
//! 3. **Write**: The writer stages each output batch
//! 4. **Commit**: Staged output becomes visible once every batch is written
//! 5. **Report**: A job summary is logged and returned
//!
//! # Example
//!
//! ```rust,no_run
//! use veil::adapters::folder::{FolderReader, FolderWriter};
//! use veil::anonymization::{AnonymizerEngine, ProcessorRegistry};
//! use veil::core::cancellation::CancellationSignal;
//! use veil::core::pipeline::{DocumentItemProcessor, PartitionedExecutionPipeline, PipelineOptions};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = AnonymizerEngine::from_file("rules.json", &ProcessorRegistry::new())?;
//!
//! // Create shutdown signal
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!
//! let pipeline = PartitionedExecutionPipeline::new(
//!     PipelineOptions::default(),
//!     Arc::new(DocumentItemProcessor::new(Arc::new(engine))),
//!     CancellationSignal::new(shutdown_rx),
//! )?;
//!
//! let reader = FolderReader::open("input", true).await?;
//! let summary = pipeline.run(reader, FolderWriter::new("output")).await?;
//!
//! println!("Processed: {}", summary.processed);
//! println!("Failed: {}", summary.failed);
//! # Ok(())
//! # }
//! ```

pub mod cancellation;
pub mod pipeline;
pub mod retry;
