//! Folder-of-files source and sink
//!
//! [`FolderReader`] yields every `.json` file under an input directory, in
//! path order. The destination of each item is its path relative to the input
//! root, so [`FolderWriter`] mirrors the input tree under its output root.
//! Output files are staged as hidden `.partial` files and renamed on commit.

use super::traits::{BatchWriter, ItemReader, SourceItem};
use crate::core::pipeline::batch::{BatchItem, BatchOutput};
use crate::domain::{Result, VeilError};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

/// Reads one item per `.json` file
#[derive(Debug)]
pub struct FolderReader {
    root: PathBuf,
    files: VecDeque<PathBuf>,
}

impl FolderReader {
    /// List the input files under `root`
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Io`] if `root` is not a readable directory.
    pub async fn open(root: impl AsRef<Path>, recursive: bool) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut files = Vec::new();
        let mut directories = vec![root.clone()];

        while let Some(dir) = directories.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
                VeilError::Io(format!("Failed to read directory {}: {}", dir.display(), e))
            })?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if recursive {
                        directories.push(path);
                    }
                } else if is_json_file(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();

        tracing::info!(
            root = %root.display(),
            files = files.len(),
            recursive,
            "Listed input files"
        );

        Ok(Self {
            root,
            files: files.into(),
        })
    }

    /// Files not read yet
    pub fn remaining(&self) -> usize {
        self.files.len()
    }
}

fn is_json_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[async_trait]
impl ItemReader for FolderReader {
    async fn next(&mut self) -> Result<Option<SourceItem>> {
        let Some(path) = self.files.front().cloned() else {
            return Ok(None);
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| VeilError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        // Only advance once the read succeeded so a retry reads the same file
        self.files.pop_front();

        let relative = path.strip_prefix(&self.root).unwrap_or(&path);
        Ok(Some(BatchItem::new(
            path.display().to_string(),
            relative.display().to_string(),
            content,
        )))
    }
}

/// Writes one file per item under an output root
#[derive(Debug)]
pub struct FolderWriter {
    root: PathBuf,
    /// Final path → staging path
    staged: BTreeMap<PathBuf, PathBuf>,
    committed: bool,
}

impl FolderWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            staged: BTreeMap::new(),
            committed: false,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn staging_path(target: &Path) -> Result<PathBuf> {
        let file_name = target.file_name().ok_or_else(|| {
            VeilError::Io(format!("{} is not a file path", target.display()))
        })?;
        Ok(target.with_file_name(format!(".{}.partial", file_name.to_string_lossy())))
    }
}

#[async_trait]
impl BatchWriter for FolderWriter {
    async fn write_batch(&mut self, batch: BatchOutput<String>) -> Result<()> {
        for item in &batch.items {
            let target = self.root.join(&item.destination);
            let staging = Self::staging_path(&target)?;

            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    VeilError::Io(format!(
                        "Failed to create output directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
            tokio::fs::write(&staging, item.value.as_bytes())
                .await
                .map_err(|e| {
                    VeilError::Io(format!("Failed to write {}: {}", staging.display(), e))
                })?;

            self.staged.insert(target, staging);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.committed {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.root).await?;

        while let Some((target, staging)) = self.staged.pop_first() {
            if let Err(e) = tokio::fs::rename(&staging, &target).await {
                self.staged.insert(target.clone(), staging);
                return Err(VeilError::Io(format!(
                    "Failed to move output into {}: {}",
                    target.display(),
                    e
                )));
            }
        }
        self.committed = true;

        tracing::info!(root = %self.root.display(), "Folder output committed");
        Ok(())
    }
}

impl Drop for FolderWriter {
    fn drop(&mut self) {
        if !self.committed {
            for staging in self.staged.values() {
                let _ = std::fs::remove_file(staging);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_reader_lists_json_files_in_order() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.JSON"), "{\"a\":1}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "skip").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested").join("c.json"), "{}").unwrap();

        let flat = FolderReader::open(dir.path(), false).await.unwrap();
        assert_eq!(flat.remaining(), 2);

        let mut reader = FolderReader::open(dir.path(), true).await.unwrap();
        assert_eq!(reader.remaining(), 3);

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(first.destination, "a.JSON");
        assert_eq!(first.value, "{\"a\":1}");
        assert_eq!(reader.next().await.unwrap().unwrap().destination, "b.json");
        let nested = reader.next().await.unwrap().unwrap();
        assert_eq!(
            PathBuf::from(&nested.destination),
            PathBuf::from("nested").join("c.json")
        );
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_mirrors_tree_on_commit() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let mut writer = FolderWriter::new(&out);

        writer
            .write_batch(BatchOutput::new(
                0,
                vec![
                    BatchItem::new("in/a.json", "a.json", "{\"a\":1}".to_string()),
                    BatchItem::new("in/x/b.json", "x/b.json", "{}".to_string()),
                ],
            ))
            .await
            .unwrap();
        assert!(!out.join("a.json").exists());
        assert!(out.join(".a.json.partial").exists());

        writer.commit().await.unwrap();
        assert_eq!(std::fs::read_to_string(out.join("a.json")).unwrap(), "{\"a\":1}");
        assert!(out.join("x").join("b.json").exists());
        assert!(!out.join(".a.json.partial").exists());
    }

    #[tokio::test]
    async fn test_uncommitted_files_removed_on_drop() {
        let dir = tempdir().unwrap();
        {
            let mut writer = FolderWriter::new(dir.path());
            writer
                .write_batch(BatchOutput::new(
                    0,
                    vec![BatchItem::new("in/a.json", "a.json", "{}".to_string())],
                ))
                .await
                .unwrap();
        }
        assert!(!dir.path().join(".a.json.partial").exists());
        assert!(!dir.path().join("a.json").exists());
    }
}
