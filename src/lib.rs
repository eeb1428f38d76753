// Veil - Rule-driven de-identification of healthcare records
// Copyright (c) 2025 Veil Contributors
// Licensed under the MIT License

//! # Veil - Rule-driven de-identification
//!
//! Veil removes or transforms identifying information in hierarchical
//! healthcare records (FHIR-style JSON resources and imaging-metadata
//! datasets) according to an ordered list of rules.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Validating** rule configurations before any document is touched
//! - **Matching** rules to document nodes by type, path expression or tag
//! - **Transforming** matched nodes with redact, keep, cryptoHash, encrypt,
//!   dateShift, perturb, substitute and generalize processors
//! - **Running** batch jobs through a bounded reader/worker/writer pipeline
//!   with cancellation, retries and failure policies
//!
//! ## Architecture
//!
//! Veil follows a layered architecture:
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`anonymization`] - Rule configuration, processors and the engine
//! - [`document`] - Arena-backed document tree and path evaluation
//! - [`core`] - Batch pipeline, cancellation and retry
//! - [`adapters`] - Folder and NDJSON readers and writers
//! - [`domain`] - Error taxonomy
//! - [`config`] - Application configuration
//! - [`logging`] - Structured logging
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use veil::anonymization::{AnonymizerEngine, ProcessorRegistry};
//!
//! # fn main() -> veil::domain::Result<()> {
//! let engine = AnonymizerEngine::from_file("rules.json", &ProcessorRegistry::new())?;
//! let outcome = engine.anonymize_str(
//!     r#"{"resourceType": "Patient", "name": [{"family": "Doe"}]}"#,
//!     "patient.json",
//! )?;
//!
//! println!("{}", outcome.value);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`domain::Result`]. Each
//! [`domain::VeilError`] variant maps onto a process exit code:
//!
//! ```rust,no_run
//! use veil::domain::VeilError;
//!
//! let error = VeilError::InvalidInput("not a JSON object".into());
//! assert_eq!(error.exit_code(), 3);
//! ```

pub mod adapters;
pub mod anonymization;
pub mod cli;
pub mod config;
pub mod core;
pub mod document;
pub mod domain;
pub mod logging;
