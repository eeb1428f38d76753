//! CLI command implementations
//!
//! This module contains all CLI command implementations and the setup they
//! share: loading `veil.toml` and building the anonymization engine.

pub mod anonymize;
pub mod bulk;
pub mod init;
pub mod validate;

use crate::anonymization::audit::AuditLogger;
use crate::anonymization::{AnonymizerEngine, ProcessorRegistry};
use crate::config::{load_config, VeilConfig};
use crate::domain::Result;
use std::path::{Path, PathBuf};

/// Load the application configuration, falling back to defaults when the
/// file does not exist
pub(crate) fn load_app_config(config_path: &str) -> Result<VeilConfig> {
    if Path::new(config_path).exists() {
        load_config(config_path)
    } else {
        tracing::warn!(
            config_path = %config_path,
            "Configuration file not found, using defaults"
        );
        Ok(VeilConfig::default())
    }
}

/// Rule file from the command line, or the one named in the configuration
pub(crate) fn rules_path(config: &VeilConfig, rules: Option<&PathBuf>) -> PathBuf {
    rules
        .cloned()
        .unwrap_or_else(|| config.anonymization.rules_file.clone())
}

/// Build an engine for the rule file, with the audit logger if enabled
pub(crate) fn build_engine(config: &VeilConfig, rules: &Path) -> Result<AnonymizerEngine> {
    let engine = AnonymizerEngine::from_file(rules, &ProcessorRegistry::new())?;

    let audit = &config.anonymization.audit;
    if audit.enabled {
        let logger = AuditLogger::new(audit.log_path.clone(), audit.json_format, true)?;
        tracing::info!(log_path = %audit.log_path.display(), "Audit logging enabled");
        Ok(engine.with_audit_logger(logger))
    } else {
        Ok(engine)
    }
}
