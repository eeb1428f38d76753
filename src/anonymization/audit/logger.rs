//! Audit logger for anonymization operations

use crate::anonymization::result::ProcessResult;
use crate::domain::{Result, VeilError};
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Audit log entry
#[derive(Debug, Serialize)]
struct AuditLogEntry {
    timestamp: String,
    /// SHA-256 hash of the item locator (file names may carry identifiers)
    locator_hash: String,
    nodes_changed: usize,
    operations: BTreeMap<String, usize>,
    processing_time_ms: u64,
}

/// Audit logger for anonymization operations
#[derive(Debug)]
pub struct AuditLogger {
    log_path: PathBuf,
    json_format: bool,
    enabled: bool,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// Create a new audit logger
    pub fn new(log_path: PathBuf, json_format: bool, enabled: bool) -> Result<Self> {
        if enabled {
            // Ensure parent directory exists
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    VeilError::Io(format!(
                        "Failed to create audit log directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        Ok(Self {
            log_path,
            json_format,
            enabled,
            write_lock: Mutex::new(()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Log the operations applied to one item
    pub fn log_item(
        &self,
        locator: &str,
        result: &ProcessResult,
        processing_time_ms: u64,
    ) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let operations = result.counts();
        let entry = AuditLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            locator_hash: hash_locator(locator),
            nodes_changed: operations.values().sum(),
            operations,
            processing_time_ms,
        };

        self.write_entry(&entry)
    }

    /// Write an audit entry to the log file
    fn write_entry(&self, entry: &AuditLogEntry) -> Result<()> {
        let line = if self.json_format {
            serde_json::to_string(entry)?
        } else {
            let operations = entry
                .operations
                .iter()
                .map(|(op, count)| format!("{op}={count}"))
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "[{}] Item: {} | Nodes: {} | Operations: {} | Time: {}ms",
                entry.timestamp,
                entry.locator_hash,
                entry.nodes_changed,
                operations,
                entry.processing_time_ms
            )
        };

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| VeilError::Io("Audit log lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| {
                VeilError::Io(format!(
                    "Failed to open audit log {}: {}",
                    self.log_path.display(),
                    e
                ))
            })?;
        writeln!(file, "{line}")?;

        Ok(())
    }
}

/// Hash a locator using SHA-256
fn hash_locator(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    format!("{result:x}")
}
