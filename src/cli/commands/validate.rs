//! Validate config command implementation
//!
//! This module implements the `validate-config` command, which checks the
//! application configuration and the rule file it points to.

use super::{load_app_config, rules_path};
use crate::anonymization::config::load_rule_configuration;
use crate::anonymization::ProcessorRegistry;
use crate::document::path::SimplePathEvaluator;
use clap::Args;
use std::path::PathBuf;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Rule file (overrides anonymization.rules_file)
    #[arg(short, long)]
    pub rules: Option<PathBuf>,
}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_app_config(config_path) {
            Ok(c) => {
                println!("✅ Configuration loaded successfully");
                c
            }
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(e.exit_code());
            }
        };

        let rules = rules_path(&config, self.rules.as_ref());
        let rule_config = match load_rule_configuration(
            &rules,
            &ProcessorRegistry::new(),
            &SimplePathEvaluator::new(),
        ) {
            Ok(c) => {
                println!("✅ Rule file is valid: {}", rules.display());
                c
            }
            Err(e) => {
                println!("❌ Rule file validation failed: {}", rules.display());
                println!("   Error: {e}");
                return Ok(e.exit_code());
            }
        };

        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Rules: {}", rule_config.rules.len());
        for (index, rule) in rule_config.rules.iter().enumerate() {
            let target = rule
                .matcher
                .path
                .as_deref()
                .or(rule.matcher.tag.as_deref())
                .or(rule.matcher.type_filter.as_deref())
                .unwrap_or("*");
            println!("    {index}. {target} → {}", rule.method);
        }
        println!("  Processing Errors: {}", rule_config.error_policy);
        println!(
            "  Security Labels: {}",
            if rule_config.parameters.add_security_labels {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("  Workers: {}", config.pipeline.workers);
        println!("  Batch Size: {}", config.pipeline.batch_size);
        println!(
            "  Audit Log: {}",
            if config.anonymization.audit.enabled {
                config.anonymization.audit.log_path.display().to_string()
            } else {
                "disabled".to_string()
            }
        );
        println!();
        Ok(0)
    }
}
