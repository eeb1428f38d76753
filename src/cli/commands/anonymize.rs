//! Anonymize command implementation
//!
//! This module implements the `anonymize` command, which de-identifies a
//! single JSON document.

use super::{build_engine, load_app_config, rules_path};
use crate::anonymization::AnonymizerEngine;
use crate::domain::{Result, VeilError};
use clap::Args;
use std::path::{Path, PathBuf};

/// Arguments for the anonymize command
#[derive(Args, Debug)]
pub struct AnonymizeArgs {
    /// Input JSON document
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output path for the anonymized document
    #[arg(short, long)]
    pub output: PathBuf,

    /// Rule file (overrides anonymization.rules_file)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,
}

impl AnonymizeArgs {
    /// Execute the anonymize command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(input = %self.input.display(), "Starting anonymize command");

        let config = match load_app_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Failed to load configuration: {e}");
                return Ok(e.exit_code());
            }
        };

        let rules = rules_path(&config, self.rules.as_ref());
        let engine = match build_engine(&config, &rules) {
            Ok(engine) => engine,
            Err(e) => {
                tracing::error!(error = %e, rules = %rules.display(), "Invalid rule configuration");
                eprintln!("❌ Invalid rule configuration: {e}");
                return Ok(e.exit_code());
            }
        };

        match anonymize_file(&engine, &self.input, &self.output).await {
            Ok(operations) => {
                println!("✅ Anonymized {} → {}", self.input.display(), self.output.display());
                for (operation, count) in operations {
                    println!("  {operation}: {count}");
                }
                Ok(0)
            }
            Err(e) => {
                tracing::error!(error = %e, "Anonymization failed");
                eprintln!("❌ Anonymization failed: {e}");
                Ok(e.exit_code())
            }
        }
    }
}

/// Anonymize `input` into `output`, returning per-operation node counts
async fn anonymize_file(
    engine: &AnonymizerEngine,
    input: &Path,
    output: &Path,
) -> Result<Vec<(String, usize)>> {
    let text = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| VeilError::Io(format!("Failed to read {}: {}", input.display(), e)))?;

    let outcome = engine.anonymize_str(&text, &input.display().to_string())?;
    let rendered = serde_json::to_string_pretty(&outcome.value)?;

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output, rendered)
        .await
        .map_err(|e| VeilError::Io(format!("Failed to write {}: {}", output.display(), e)))?;

    Ok(outcome.result.counts().into_iter().collect())
}
