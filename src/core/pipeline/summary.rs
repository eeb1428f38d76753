//! Job summary and reporting

use std::time::Duration;
use uuid::Uuid;

/// An item that failed and was left out of the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Source locator of the item
    pub locator: String,
    pub message: String,
    /// Exit code of the underlying error
    pub exit_code: i32,
}

impl ItemFailure {
    pub fn new(locator: impl Into<String>, error: &crate::domain::VeilError) -> Self {
        Self {
            locator: locator.into(),
            message: error.to_string(),
            exit_code: error.exit_code(),
        }
    }
}

/// Summary of a pipeline job
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: Uuid,

    /// Items transformed successfully
    pub processed: u64,

    /// Items with a blank payload
    pub skipped: u64,

    /// Items that failed under the skip or ignoreInvalid policy
    pub failed: u64,

    /// Batches taken from the input channel by workers
    pub consumed_batches: u64,

    /// Items written by the writer
    pub written: u64,

    /// Items read but not written because the job stopped early
    pub dropped: u64,

    /// Whether the job stopped because cancellation was requested
    pub cancelled: bool,

    /// Whether the writer committed its output
    pub committed: bool,

    pub failures: Vec<ItemFailure>,

    pub duration: Duration,
}

impl JobSummary {
    /// Create an empty summary for a job
    pub fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            processed: 0,
            skipped: 0,
            failed: 0,
            consumed_batches: 0,
            written: 0,
            dropped: 0,
            cancelled: false,
            committed: false,
            failures: Vec::new(),
            duration: Duration::from_secs(0),
        }
    }

    /// Set the duration
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn add_failure(&mut self, failure: ItemFailure) {
        self.failures.push(failure);
    }

    /// Total items that reached a worker
    pub fn total(&self) -> u64 {
        self.processed + self.skipped + self.failed
    }

    /// Committed with no failed or skipped items
    pub fn is_successful(&self) -> bool {
        self.committed && !self.cancelled && self.failed == 0 && self.skipped == 0
    }

    /// Get success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        (self.processed as f64 / total as f64) * 100.0
    }

    /// Process exit code for a job that ran to the end
    ///
    /// Cancellation yields 130 and partial success yields 1.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled {
            130
        } else if self.is_successful() {
            0
        } else {
            1
        }
    }

    /// Log the summary
    pub fn log_summary(&self) {
        tracing::info!(
            job_id = %self.job_id,
            processed = self.processed,
            skipped = self.skipped,
            failed = self.failed,
            consumed_batches = self.consumed_batches,
            written = self.written,
            dropped = self.dropped,
            cancelled = self.cancelled,
            committed = self.committed,
            duration_secs = self.duration.as_secs(),
            success_rate = format!("{:.2}%", self.success_rate()),
            "Job completed"
        );

        if !self.failures.is_empty() {
            tracing::warn!(
                failure_count = self.failures.len(),
                "Job completed with failed items"
            );
            for failure in &self.failures {
                tracing::warn!(
                    locator = %failure.locator,
                    message = %failure.message,
                    "Item failed"
                );
            }
        }
    }
}
