//! Batch pipeline and job reporting
//!
//! This module provides the concurrent batch runner for Veil, including:
//! - Batch envelopes passed between stages
//! - The reader → worker pool → writer coordinator
//! - Live progress counters
//! - Job summary and reporting

pub mod batch;
pub mod coordinator;
pub mod progress;
pub mod summary;

pub use batch::{BatchInput, BatchItem, BatchOutput};
pub use coordinator::{
    DocumentItemProcessor, ItemProcessor, PartitionedExecutionPipeline, PipelineOptions,
};
pub use progress::{JobProgress, ProgressDetail, ProgressSnapshot};
pub use summary::{ItemFailure, JobSummary};
