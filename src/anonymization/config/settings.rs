//! Application-level anonymization settings
//!
//! The `[anonymization]` section of `veil.toml`: where the rule file lives and
//! how the audit trail is written. The rules themselves are loaded separately
//! by [`super::load_rule_configuration`].

use crate::domain::{Result, VeilError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[anonymization]` section of the application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnonymizationConfig {
    /// Path to the rule file (JSON or TOML)
    #[serde(default = "default_rules_file")]
    pub rules_file: PathBuf,

    /// Audit logging configuration
    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_rules_file() -> PathBuf {
    PathBuf::from("./rules.json")
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            rules_file: default_rules_file(),
            audit: AuditConfig::default(),
        }
    }
}

impl AnonymizationConfig {
    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        let extension = self
            .rules_file
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_lowercase();
        if !matches!(extension.as_str(), "json" | "toml") {
            return Err(format!(
                "rules_file must be a .json or .toml file: {}",
                self.rules_file.display()
            ));
        }

        self.audit
            .validate()
            .map_err(|e| format!("Invalid audit configuration: {e}"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("VEIL_ANONYMIZATION_RULES_FILE") {
            self.rules_file = PathBuf::from(val);
        }

        self.audit.apply_env_overrides()
    }
}

/// Audit logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging
    #[serde(default)]
    pub enabled: bool,

    /// Audit log file path
    #[serde(default = "default_audit_log_path")]
    pub log_path: PathBuf,

    /// Use JSON format for audit logs
    #[serde(default = "default_audit_json_format")]
    pub json_format: bool,
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("./audit/anonymization.log")
}

fn default_audit_json_format() -> bool {
    true
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: default_audit_log_path(),
            json_format: default_audit_json_format(),
        }
    }
}

impl AuditConfig {
    /// Validate audit configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.enabled && self.log_path.as_os_str().is_empty() {
            return Err("log_path cannot be empty when audit logging is enabled".to_string());
        }
        Ok(())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("VEIL_ANONYMIZATION_AUDIT_ENABLED") {
            self.enabled = val.parse().map_err(|_| {
                VeilError::Configuration(format!(
                    "Invalid VEIL_ANONYMIZATION_AUDIT_ENABLED value: {val}"
                ))
            })?;
        }

        if let Ok(val) = std::env::var("VEIL_ANONYMIZATION_AUDIT_LOG_PATH") {
            self.log_path = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("VEIL_ANONYMIZATION_AUDIT_JSON_FORMAT") {
            self.json_format = val.parse().map_err(|_| {
                VeilError::Configuration(format!(
                    "Invalid VEIL_ANONYMIZATION_AUDIT_JSON_FORMAT value: {val}"
                ))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnonymizationConfig::default();
        assert_eq!(config.rules_file, PathBuf::from("./rules.json"));
        assert!(!config.audit.enabled);
        assert!(config.audit.json_format);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rules_file_extension_is_checked() {
        let config = AnonymizationConfig {
            rules_file: PathBuf::from("rules.yaml"),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains(".json or .toml"));
    }
}
