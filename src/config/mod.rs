//! Configuration management for Veil.
//!
//! This module provides TOML-based loading, parsing, and validation of the
//! application configuration (`veil.toml`). The anonymization rules live in a
//! separate rule file referenced from the `[anonymization]` section.
//!
//! # Overview
//!
//! Veil configuration files support:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - Default values for every setting
//! - `VEIL_<SECTION>_<KEY>` environment overrides
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use veil::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("veil.toml")?;
//!
//! println!("Rules: {}", config.anonymization.rules_file.display());
//! println!("Workers: {}", config.pipeline.workers);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Application settings (log level)
//! - [`AnonymizationConfig`](crate::anonymization::config::AnonymizationConfig) - Rule file and audit log
//! - [`PipelineConfig`] - Workers, batch size, channel capacity, timeouts and retries
//! - [`LoggingConfig`] - Local log files and rotation
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//!
//! [anonymization]
//! rules_file = "./rules.json"
//!
//! [anonymization.audit]
//! enabled = true
//! log_path = "./audit/anonymization.log"
//!
//! [pipeline]
//! workers = 4
//! batch_size = 100
//!
//! [logging]
//! local_enabled = true
//! local_path = "./logs"
//! local_rotation = "daily"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{ApplicationConfig, LoggingConfig, PipelineConfig, VeilConfig};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};
