//! Reader and writer traits
//!
//! This module defines the traits that source and sink adapters must
//! implement to be driven by the batch pipeline.

use crate::core::pipeline::batch::{BatchItem, BatchOutput};
use crate::domain::Result;
use async_trait::async_trait;

/// Raw item as read from a source: locators plus the unparsed payload
pub type SourceItem = BatchItem<String>;

/// Sequential source of items
///
/// The pipeline calls `next` from a single task, wrapped in its timeout and
/// retry guard, until it returns `Ok(None)`.
#[async_trait]
pub trait ItemReader: Send {
    /// Read the next item
    ///
    /// # Errors
    ///
    /// Returns [`crate::domain::VeilError::Io`] for transient failures that
    /// may be retried, any other variant for permanent ones.
    async fn next(&mut self) -> Result<Option<SourceItem>>;
}

/// Sink for transformed batches
///
/// Batches may arrive out of sequence order when several workers run. Output
/// only becomes visible after [`commit`](BatchWriter::commit), which the
/// pipeline calls exactly once, after every batch was written, and never on a
/// cancelled or aborted job.
#[async_trait]
pub trait BatchWriter: Send {
    /// Write one batch
    ///
    /// The call may be retried with the same batch after a timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch cannot be staged.
    async fn write_batch(&mut self, batch: BatchOutput<String>) -> Result<()>;

    /// Make all written batches visible
    ///
    /// # Errors
    ///
    /// Returns an error if staged output cannot be finalized.
    async fn commit(&mut self) -> Result<()>;
}
