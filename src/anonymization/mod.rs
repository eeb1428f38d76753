//! Anonymization module for Veil
//!
//! This module de-identifies hierarchical clinical documents according to a
//! declarative rule set. Rules select nodes by type, element name or path and
//! name the processor that transforms them.
//!
//! # Architecture
//!
//! The anonymization engine consists of:
//! - **Configuration**: Rule set, global parameters and error policy, validated once
//! - **Registry**: Method names resolved to built-in or custom processors
//! - **Processors**: Redact, keep, hash, encrypt, shift dates, perturb, substitute, generalize
//! - **Matcher / Visitor**: First applicable rule per node, record-scoped results
//! - **Audit**: Per-item operation counts with hashed locators
//!
//! # Usage
//!
//! ```rust,no_run
//! use veil::anonymization::{AnonymizerEngine, registry::ProcessorRegistry};
//!
//! let engine = AnonymizerEngine::from_file("rules.json", &ProcessorRegistry::new())?;
//! let outcome = engine.anonymize_str(r#"{"resourceType": "Patient"}"#, "patient.json")?;
//! println!("{}", outcome.value);
//! # Ok::<(), veil::domain::VeilError>(())
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod engine;
pub mod matcher;
pub mod processors;
pub mod reference;
pub mod registry;
pub mod result;
pub mod visitor;

// Re-export main types
pub use config::{Configuration, ProcessingErrorPolicy, Rule};
pub use engine::{AnonymizationOutcome, AnonymizerEngine};
pub use registry::{CustomProcessor, ProcessorRegistry};
pub use result::{Operation, ProcessResult};
