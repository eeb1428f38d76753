//! Data sources and sinks for Veil.
//!
//! This module provides adapters the batch pipeline reads from and writes to:
//!
//! - [`traits`] - The [`ItemReader`] and [`BatchWriter`] contracts
//! - [`folder`] - One JSON document per file, mirrored into an output tree
//! - [`ndjson`] - One JSON document per line
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate storage from the
//! pipeline and enable testing with in-memory implementations. Writers stage
//! their output and only make it visible on commit, so an aborted or cancelled
//! job leaves no partial result behind.
//!
//! # Example
//!
//! ```rust,no_run
//! use veil::adapters::ndjson::NdjsonReader;
//! use veil::adapters::ItemReader;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut reader = NdjsonReader::open("patients.ndjson").await?;
//! while let Some(item) = reader.next().await? {
//!     println!("{} ({} bytes)", item.source, item.value.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod folder;
pub mod ndjson;
pub mod traits;

pub use traits::{BatchWriter, ItemReader, SourceItem};
