//! CLI interface and argument parsing
//!
//! This module provides the command-line interface for Veil using clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Veil - Rule-driven de-identification of healthcare records
#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(version, about, long_about = None)]
#[command(author = "Veil Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "veil.toml", env = "VEIL_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "VEIL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Anonymize a single JSON document
    Anonymize(commands::anonymize::AnonymizeArgs),

    /// Anonymize a folder of JSON documents or an NDJSON file
    Bulk(commands::bulk::BulkArgs),

    /// Validate configuration and rule files
    ValidateConfig(commands::validate::ValidateArgs),

    /// Initialize sample configuration and rule files
    Init(commands::init::InitArgs),
}
