//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - JSON-formatted log files
//! - Configurable log levels
//! - Local file logging with rotation
//!
//! # Example
//!
//! ```no_run
//! use veil::logging::init_logging;
//! use veil::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! // Use tracing macros for logging
//! tracing::info!("Application started");
//! tracing::error!(error = "Something went wrong", "Error occurred");
//! ```

pub mod structured;

// Re-export commonly used items
pub use structured::{init_logging, LoggingGuard};

/// Log the start of a pipeline job
///
/// # Example
///
/// ```no_run
/// use veil::log_job_start;
///
/// let job_id = uuid::Uuid::new_v4();
/// log_job_start!(job_id, 4, 100);
/// ```
#[macro_export]
macro_rules! log_job_start {
    ($job_id:expr, $workers:expr, $batch_size:expr) => {
        tracing::info!(
            job_id = %$job_id,
            workers = $workers,
            batch_size = $batch_size,
            "Starting job"
        );
    };
}

/// Log the completion of a pipeline job
///
/// # Example
///
/// ```no_run
/// use veil::log_job_complete;
/// use std::time::Duration;
///
/// let job_id = uuid::Uuid::new_v4();
/// log_job_complete!(job_id, 42, Duration::from_secs(10));
/// ```
#[macro_export]
macro_rules! log_job_complete {
    ($job_id:expr, $count:expr, $duration:expr) => {
        tracing::info!(
            job_id = %$job_id,
            count = $count,
            duration_ms = $duration.as_millis() as u64,
            "Job finished"
        );
    };
}

/// Log a batch taken up by a worker
///
/// # Example
///
/// ```no_run
/// use veil::log_batch_processing;
///
/// log_batch_processing!(3, 100);
/// ```
#[macro_export]
macro_rules! log_batch_processing {
    ($sequence:expr, $items:expr) => {
        tracing::debug!(sequence = $sequence, items = $items, "Processing batch");
    };
}

/// Log a retry attempt
///
/// # Example
///
/// ```no_run
/// use veil::log_retry_attempt;
///
/// log_retry_attempt!(2, 3, "Connection timeout");
/// ```
#[macro_export]
macro_rules! log_retry_attempt {
    ($attempt:expr, $max_attempts:expr, $reason:expr) => {
        tracing::warn!(
            attempt = $attempt,
            max_attempts = $max_attempts,
            reason = %$reason,
            "Retrying operation"
        );
    };
}
