//! Newline-delimited JSON source and sink
//!
//! [`NdjsonReader`] yields one item per line, blank lines included so the
//! pipeline can count them as skipped. [`NdjsonWriter`] stages output in a
//! `.partial` file next to the destination, restores input order from batch
//! sequence numbers and renames the staging file on commit.

use super::traits::{BatchWriter, ItemReader, SourceItem};
use crate::core::pipeline::batch::{BatchItem, BatchOutput};
use crate::domain::{Result, VeilError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter, Lines};

/// Reads an NDJSON file line by line
#[derive(Debug)]
pub struct NdjsonReader {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_number: u64,
}

impl NdjsonReader {
    /// Open an NDJSON file
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Io`] if the file cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            VeilError::Io(format!("Failed to open {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Opened NDJSON input");

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            line_number: 0,
        })
    }
}

#[async_trait]
impl ItemReader for NdjsonReader {
    async fn next(&mut self) -> Result<Option<SourceItem>> {
        let line = self.lines.next_line().await.map_err(|e| {
            VeilError::Io(format!(
                "Failed to read {} after line {}: {}",
                self.path.display(),
                self.line_number,
                e
            ))
        })?;

        Ok(line.map(|line| {
            self.line_number += 1;
            let locator = format!("{}:{}", self.path.display(), self.line_number);
            BatchItem::new(locator.clone(), locator, line)
        }))
    }
}

/// Writes transformed items to an NDJSON file in input order
#[derive(Debug)]
pub struct NdjsonWriter {
    path: PathBuf,
    staging: PathBuf,
    file: Option<BufWriter<File>>,
    pending: BTreeMap<u64, BatchOutput<String>>,
    in_flight: Option<EncodedBatch>,
    next_sequence: u64,
    committed: bool,
}

/// A batch being written, with the number of bytes already accepted
#[derive(Debug)]
struct EncodedBatch {
    sequence: u64,
    bytes: Vec<u8>,
    written: usize,
}

impl EncodedBatch {
    fn new(batch: &BatchOutput<String>) -> Self {
        let mut bytes = Vec::new();
        for item in &batch.items {
            bytes.extend_from_slice(item.value.as_bytes());
            bytes.push(b'\n');
        }
        Self {
            sequence: batch.sequence,
            bytes,
            written: 0,
        }
    }
}

impl NdjsonWriter {
    /// Create the staging file for `path`
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Configuration`] if `path` has no file name and
    /// [`VeilError::Io`] if the staging file cannot be created.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file_name = path.file_name().ok_or_else(|| {
            VeilError::Configuration(format!("{} is not a file path", path.display()))
        })?;
        let staging = path.with_file_name(format!("{}.partial", file_name.to_string_lossy()));

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                VeilError::Io(format!(
                    "Failed to create output directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let file = File::create(&staging).await.map_err(|e| {
            VeilError::Io(format!("Failed to create {}: {}", staging.display(), e))
        })?;

        Ok(Self {
            path,
            staging,
            file: Some(BufWriter::new(file)),
            pending: BTreeMap::new(),
            in_flight: None,
            next_sequence: 0,
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write every pending batch up to the first gap, or all of them
    ///
    /// Progress is recorded after every accepted write, so a call dropped
    /// part way through resumes where it stopped instead of repeating lines.
    async fn flush_pending(&mut self, up_to_gap: bool) -> Result<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            VeilError::Io(format!("{} is already committed", self.path.display()))
        })?;

        loop {
            if self.in_flight.is_none() {
                let Some((&sequence, _)) = self.pending.first_key_value() else {
                    break;
                };
                if up_to_gap && sequence != self.next_sequence {
                    break;
                }
                let Some(batch) = self.pending.remove(&sequence) else {
                    break;
                };
                self.in_flight = Some(EncodedBatch::new(&batch));
            }
            let Some(batch) = self.in_flight.as_mut() else {
                break;
            };

            while batch.written < batch.bytes.len() {
                let accepted = file.write(&batch.bytes[batch.written..]).await?;
                if accepted == 0 {
                    return Err(VeilError::Io(format!(
                        "{} stopped accepting output",
                        self.staging.display()
                    )));
                }
                batch.written += accepted;
            }
            self.next_sequence = batch.sequence + 1;
            self.in_flight = None;
        }
        Ok(())
    }
}

#[async_trait]
impl BatchWriter for NdjsonWriter {
    async fn write_batch(&mut self, batch: BatchOutput<String>) -> Result<()> {
        // Already flushed, or partly written, by an earlier attempt
        let resuming = self
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.sequence == batch.sequence);
        if batch.sequence >= self.next_sequence && !resuming {
            self.pending.insert(batch.sequence, batch);
        }
        self.flush_pending(true).await
    }

    async fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        self.flush_pending(false).await?;

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.get_ref().sync_all().await?;
        }
        tokio::fs::rename(&self.staging, &self.path).await.map_err(|e| {
            VeilError::Io(format!(
                "Failed to move {} to {}: {}",
                self.staging.display(),
                self.path.display(),
                e
            ))
        })?;
        self.committed = true;

        tracing::info!(path = %self.path.display(), "NDJSON output committed");
        Ok(())
    }
}

impl Drop for NdjsonWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn output(sequence: u64, values: &[&str]) -> BatchOutput<String> {
        BatchOutput::new(
            sequence,
            values
                .iter()
                .map(|v| BatchItem::new("in", "out", v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_reader_yields_lines_with_locators() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("in.ndjson");
        std::fs::write(&path, "{\"a\":1}\n\n{\"b\":2}\n").unwrap();

        let mut reader = NdjsonReader::open(&path).await.unwrap();
        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.value, "{\"a\":1}");
        assert!(first.source.ends_with("in.ndjson:1"));

        let blank = reader.next().await.unwrap().unwrap();
        assert_eq!(blank.value, "");

        let third = reader.next().await.unwrap().unwrap();
        assert!(third.source.ends_with("in.ndjson:3"));
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_input_is_io_error() {
        let dir = tempdir().unwrap();
        let err = NdjsonReader::open(dir.path().join("missing.ndjson"))
            .await
            .unwrap_err();
        assert!(matches!(err, VeilError::Io(_)));
    }

    #[tokio::test]
    async fn test_writer_restores_sequence_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("result.ndjson");

        let mut writer = NdjsonWriter::create(&path).await.unwrap();
        writer.write_batch(output(1, &["c", "d"])).await.unwrap();
        writer.write_batch(output(0, &["a", "b"])).await.unwrap();
        writer.write_batch(output(0, &["a", "b"])).await.unwrap();
        writer.write_batch(output(2, &[])).await.unwrap();
        writer.write_batch(output(3, &["e"])).await.unwrap();
        assert!(!path.exists());

        writer.commit().await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\nc\nd\ne\n");
        assert!(!dir.path().join("out").join("result.ndjson.partial").exists());
    }

    #[tokio::test]
    async fn test_interrupted_write_is_not_repeated_on_retry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.ndjson");
        // Lines larger than the write buffer go straight to the file
        let long_a = "a".repeat(20_000);
        let long_b = "b".repeat(20_000);

        let mut writer = NdjsonWriter::create(&path).await.unwrap();
        writer.write_batch(output(0, &["first"])).await.unwrap();

        // Dropped after its first poll, like a write that hit its timeout
        let batch = output(1, &[long_a.as_str(), long_b.as_str()]);
        let _ = tokio::time::timeout(Duration::ZERO, writer.write_batch(batch.clone())).await;
        writer.write_batch(batch).await.unwrap();
        writer.write_batch(output(2, &["last"])).await.unwrap();
        writer.commit().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec!["first", long_a.as_str(), long_b.as_str(), "last"]);
    }

    #[tokio::test]
    async fn test_uncommitted_output_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("result.ndjson");

        {
            let mut writer = NdjsonWriter::create(&path).await.unwrap();
            writer.write_batch(output(0, &["a"])).await.unwrap();
        }

        assert!(!path.exists());
        assert!(!dir.path().join("result.ndjson.partial").exists());
    }
}
