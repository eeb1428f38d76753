//! Live job progress
//!
//! Workers update their own [`ProgressDetail`] with relaxed atomics; a status
//! poller holding the shared [`JobProgress`] can take a [`ProgressSnapshot`]
//! at any time while the job runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters owned by one worker
#[derive(Debug, Default)]
pub struct ProgressDetail {
    pub worker_id: usize,
    processed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    consumed: AtomicU64,
}

impl ProgressDetail {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was taken from the input channel
    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }
}

/// Point-in-time totals across all workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub read: u64,
    pub processed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub consumed_batches: u64,
    pub written: u64,
    pub dropped: u64,
}

/// Progress of a whole job
#[derive(Debug)]
pub struct JobProgress {
    workers: Vec<Arc<ProgressDetail>>,
    read: AtomicU64,
    written: AtomicU64,
    dropped: AtomicU64,
}

impl JobProgress {
    pub fn new(worker_count: usize) -> Self {
        Self {
            workers: (0..worker_count)
                .map(|id| Arc::new(ProgressDetail::new(id)))
                .collect(),
            read: AtomicU64::new(0),
            written: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Detail for one worker
    ///
    /// # Panics
    ///
    /// Panics if `worker_id` is not below the worker count.
    pub fn worker(&self, worker_id: usize) -> Arc<ProgressDetail> {
        self.workers[worker_id].clone()
    }

    pub fn workers(&self) -> &[Arc<ProgressDetail>] {
        &self.workers
    }

    pub fn record_read(&self) {
        self.read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::Relaxed);
    }

    /// Items read but never written because the job stopped early
    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.dropped.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut snapshot = ProgressSnapshot {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            ..Default::default()
        };
        for worker in &self.workers {
            snapshot.processed += worker.processed();
            snapshot.skipped += worker.skipped();
            snapshot.failed += worker.failed();
            snapshot.consumed_batches += worker.consumed();
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_aggregates_workers() {
        let progress = JobProgress::new(2);
        progress.worker(0).record_consumed();
        progress.worker(0).record_processed();
        progress.worker(0).record_processed();
        progress.worker(1).record_consumed();
        progress.worker(1).record_failed();
        progress.worker(1).record_skipped();
        progress.record_read();
        progress.record_written(2);
        progress.record_dropped(0);

        let snapshot = progress.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.skipped, 1);
        assert_eq!(snapshot.consumed_batches, 2);
        assert_eq!(snapshot.read, 1);
        assert_eq!(snapshot.written, 2);
        assert_eq!(snapshot.dropped, 0);
    }

    #[test]
    fn test_worker_ids() {
        let progress = JobProgress::new(3);
        let ids: Vec<usize> = progress.workers().iter().map(|w| w.worker_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
