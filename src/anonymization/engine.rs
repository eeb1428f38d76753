//! Main anonymization engine
//!
//! This module provides the [`AnonymizerEngine`] that owns a validated rule
//! configuration and applies it to documents.
//!
//! # Architecture
//!
//! The engine coordinates three components:
//! - **Matcher**: Finds the first applicable rule for each node
//! - **Visitor**: Walks the document, applies processors and labels records
//! - **Audit Logger**: Records per-item operation counts (optional)
//!
//! # Examples
//!
//! ```
//! use veil::anonymization::AnonymizerEngine;
//! use veil::anonymization::registry::ProcessorRegistry;
//! use serde_json::json;
//!
//! # fn example() -> veil::domain::Result<()> {
//! let rules = json!({
//!     "rules": [{"path": "Patient.name", "method": "redact"}]
//! });
//! let engine = AnonymizerEngine::from_value(&rules, &ProcessorRegistry::new())?;
//!
//! let patient = json!({"resourceType": "Patient", "name": [{"family": "Doe"}]});
//! let outcome = engine.anonymize_value(&patient, "patient.json")?;
//! assert!(outcome.result.is_redacted());
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use crate::anonymization::{
    audit::AuditLogger,
    config::{load_rule_configuration, Configuration},
    context::ProcessContext,
    matcher::RuleMatcher,
    registry::ProcessorRegistry,
    result::ProcessResult,
    visitor::{walk, AnonymizationVisitor},
};
use crate::document::json::{document_from_json, document_to_json};
use crate::document::path::{PathEvaluator, SimplePathEvaluator};
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Anonymized JSON value with the operations that produced it
#[derive(Debug, Clone)]
pub struct AnonymizationOutcome {
    pub value: Value,
    pub result: ProcessResult,
    pub processing_time_ms: u64,
}

/// Main anonymization engine
///
/// # Thread Safety
///
/// The engine is immutable after construction and can be shared across
/// worker tasks using `Arc`. Every call creates its own traversal context.
pub struct AnonymizerEngine {
    matcher: RuleMatcher,
    audit_logger: Option<AuditLogger>,
}

impl std::fmt::Debug for AnonymizerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymizerEngine")
            .field("matcher", &self.matcher)
            .field("audit", &self.audit_logger.is_some())
            .finish()
    }
}

impl AnonymizerEngine {
    /// Create an engine with the built-in path evaluator
    pub fn new(config: Configuration) -> Self {
        Self::with_evaluator(Arc::new(config), Arc::new(SimplePathEvaluator::new()))
    }

    /// Create an engine with a caller-supplied path evaluator
    ///
    /// The evaluator must be the one the configuration was validated with.
    pub fn with_evaluator(config: Arc<Configuration>, evaluator: Arc<dyn PathEvaluator>) -> Self {
        Self {
            matcher: RuleMatcher::new(config, evaluator),
            audit_logger: None,
        }
    }

    /// Validate a raw rule document and create an engine for it
    pub fn from_value(raw: &Value, registry: &ProcessorRegistry) -> Result<Self> {
        let evaluator = SimplePathEvaluator::new();
        let config = Configuration::from_value(raw, registry, &evaluator)?;
        Ok(Self::with_evaluator(Arc::new(config), Arc::new(evaluator)))
    }

    /// Load a rule file and create an engine for it
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Configuration`] if the file cannot be read or the
    /// rules do not validate.
    pub fn from_file(path: impl AsRef<Path>, registry: &ProcessorRegistry) -> Result<Self> {
        let evaluator = SimplePathEvaluator::new();
        let config = load_rule_configuration(path, registry, &evaluator)?;
        Ok(Self::with_evaluator(Arc::new(config), Arc::new(evaluator)))
    }

    /// Attach an audit logger
    pub fn with_audit_logger(mut self, logger: AuditLogger) -> Self {
        self.audit_logger = Some(logger);
        self
    }

    pub fn configuration(&self) -> &Configuration {
        self.matcher.configuration()
    }

    /// Anonymize a whole document in place
    pub fn anonymize_document(&self, doc: &mut Document, locator: &str) -> Result<ProcessResult> {
        let root = doc.root();
        self.anonymize_node(doc, root, locator)
    }

    /// Anonymize the subtree at `node` in place
    ///
    /// A contained record passed here is treated as the outermost record and
    /// receives no security labels of its own.
    pub fn anonymize_node(
        &self,
        doc: &mut Document,
        node: NodeId,
        locator: &str,
    ) -> Result<ProcessResult> {
        let start = Instant::now();
        let ctx = ProcessContext::new(self.configuration().parameters.clone(), locator);
        let mut visitor = AnonymizationVisitor::new(&self.matcher, ctx);
        walk(doc, node, &mut visitor)?;
        let result = visitor.finish()?;

        let processing_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            locator = %locator,
            operations = ?result.counts(),
            processing_time_ms,
            "Anonymized item"
        );

        if let Some(ref logger) = self.audit_logger {
            logger.log_item(locator, &result, processing_time_ms)?;
        }

        Ok(result)
    }

    /// Anonymize a JSON value, returning the transformed copy
    pub fn anonymize_value(&self, value: &Value, locator: &str) -> Result<AnonymizationOutcome> {
        let start = Instant::now();
        let mut doc = document_from_json(value);
        let result = self.anonymize_document(&mut doc, locator)?;
        Ok(AnonymizationOutcome {
            value: document_to_json(&doc),
            result,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Anonymize JSON text
    ///
    /// Text that is not valid JSON is invalid input, subject to the
    /// processing error policy of the caller.
    pub fn anonymize_str(&self, text: &str, locator: &str) -> Result<AnonymizationOutcome> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| VeilError::InvalidInput(format!("{locator} is not valid JSON: {e}")))?;
        self.anonymize_value(&value, locator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn engine(rules: Value) -> AnonymizerEngine {
        AnonymizerEngine::from_value(&rules, &ProcessorRegistry::new()).unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = engine(json!({"rules": [{"type": "HumanName", "method": "redact"}]}));
        assert_eq!(engine.configuration().rules.len(), 1);
    }

    #[test]
    fn test_anonymize_value() {
        let engine = engine(json!({
            "rules": [
                {"type": "HumanName", "method": "redact"},
                {"path": "Resource.id", "method": "cryptoHash"}
            ],
            "parameters": {"cryptoHashKey": "key"}
        }));

        let patient = json!({
            "resourceType": "Patient",
            "id": "example",
            "name": [{"family": "Doe", "given": ["John"]}],
            "gender": "male"
        });
        let outcome = engine.anonymize_value(&patient, "patient.json").unwrap();

        assert!(outcome.result.is_redacted());
        assert!(outcome.result.is_crypto_hashed());
        assert!(outcome.value.get("name").is_none());
        assert_eq!(outcome.value["gender"], json!("male"));
        assert_ne!(outcome.value["id"], json!("example"));
        // The input is untouched
        assert_eq!(patient["id"], json!("example"));
    }

    #[test]
    fn test_bundle_entries_labelled() {
        let engine = engine(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}));
        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {"resourceType": "Patient", "name": [{"family": "A"}]}},
                {"resource": {"resourceType": "Patient", "name": [{"family": "B"}]}}
            ]
        });
        let outcome = engine.anonymize_value(&bundle, "bundle.json").unwrap();
        for entry in outcome.value["entry"].as_array().unwrap() {
            assert_eq!(entry["resource"]["meta"]["security"][0]["code"], json!("REDACTED"));
        }
        assert_eq!(outcome.result.nodes(&crate::anonymization::result::Operation::Redact).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_json_is_invalid_input() {
        let engine = engine(json!({"rules": [{"path": "Patient", "method": "keep"}]}));
        let err = engine.anonymize_str("{not json", "bad.json").unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"{"rules": [{"path": "Patient.birthDate", "method": "redact"}]}"#,
        )
        .unwrap();

        let engine = AnonymizerEngine::from_file(&path, &ProcessorRegistry::new()).unwrap();
        let outcome = engine
            .anonymize_str(
                r#"{"resourceType": "Patient", "birthDate": "1970-01-01"}"#,
                "p.json",
            )
            .unwrap();
        assert!(outcome.value.get("birthDate").is_none());
    }

    #[test]
    fn test_audit_entries_written() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("audit.log");
        let engine = engine(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}))
            .with_audit_logger(AuditLogger::new(log_path.clone(), true, true).unwrap());

        engine
            .anonymize_value(
                &json!({"resourceType": "Patient", "name": [{"family": "Doe"}]}),
                "p.json",
            )
            .unwrap();
        let content = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("\"redact\":1"));
    }
}
