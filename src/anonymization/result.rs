//! Per-record record of applied operations
//!
//! A [`ProcessResult`] maps each [`Operation`] to the set of nodes it touched.
//! Results of nested records are merged into their container with
//! [`ProcessResult::update`], a set union per operation, so the order in which
//! child results arrive never changes the aggregate.

use crate::document::NodeId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// An anonymization operation recorded against nodes
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Redact,
    Abstract,
    CryptoHash,
    Encrypt,
    DateShift,
    Perturb,
    Substitute,
    Custom(String),
}

impl Operation {
    /// HL7 v3 ObservationValue code used for security labels
    pub fn security_code(&self) -> &str {
        match self {
            Operation::Redact => "REDACTED",
            Operation::Abstract => "ABSTRED",
            Operation::CryptoHash => "CRYTOHASH",
            Operation::Encrypt => "MASKED",
            Operation::Perturb => "PERTURBED",
            Operation::Substitute => "SUBSTITUTED",
            // Date shifting is a perturbation of the temporal value
            Operation::DateShift => "PERTURBED",
            Operation::Custom(name) => name.as_str(),
        }
    }

    /// Display text for the security label
    pub fn security_display(&self) -> &str {
        match self {
            Operation::Redact => "redacted",
            Operation::Abstract => "abstracted",
            Operation::CryptoHash => "cryptographic hash function",
            Operation::Encrypt => "masked",
            Operation::Perturb | Operation::DateShift => "exact value is replaced with another exact value",
            Operation::Substitute => "substituted",
            Operation::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Redact => write!(f, "redact"),
            Operation::Abstract => write!(f, "abstract"),
            Operation::CryptoHash => write!(f, "cryptoHash"),
            Operation::Encrypt => write!(f, "encrypt"),
            Operation::DateShift => write!(f, "dateShift"),
            Operation::Perturb => write!(f, "perturb"),
            Operation::Substitute => write!(f, "substitute"),
            Operation::Custom(name) => write!(f, "{name}"),
        }
    }
}

/// Operations applied within one record, keyed by operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    operations: BTreeMap<Operation, BTreeSet<NodeId>>,
}

impl ProcessResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Result recording a single operation on a single node
    pub fn single(operation: Operation, node: NodeId) -> Self {
        let mut result = Self::new();
        result.add(operation, node);
        result
    }

    /// Record that `operation` was applied to `node`
    pub fn add(&mut self, operation: Operation, node: NodeId) {
        self.operations.entry(operation).or_default().insert(node);
    }

    /// Union another result into this one
    pub fn update(&mut self, other: &ProcessResult) {
        for (operation, nodes) in &other.operations {
            self.operations
                .entry(operation.clone())
                .or_default()
                .extend(nodes.iter().copied());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.values().all(BTreeSet::is_empty)
    }

    /// Operations present in the result
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(operation, _)| operation)
    }

    /// Nodes touched by an operation
    pub fn nodes(&self, operation: &Operation) -> Option<&BTreeSet<NodeId>> {
        self.operations.get(operation)
    }

    /// Number of nodes touched by each operation
    pub fn counts(&self) -> BTreeMap<String, usize> {
        self.operations
            .iter()
            .filter(|(_, nodes)| !nodes.is_empty())
            .map(|(operation, nodes)| (operation.to_string(), nodes.len()))
            .collect()
    }

    fn has(&self, operation: &Operation) -> bool {
        self.operations
            .get(operation)
            .map(|nodes| !nodes.is_empty())
            .unwrap_or(false)
    }

    pub fn is_redacted(&self) -> bool {
        self.has(&Operation::Redact)
    }

    pub fn is_abstracted(&self) -> bool {
        self.has(&Operation::Abstract)
    }

    pub fn is_crypto_hashed(&self) -> bool {
        self.has(&Operation::CryptoHash)
    }

    pub fn is_encrypted(&self) -> bool {
        self.has(&Operation::Encrypt)
    }

    pub fn is_date_shifted(&self) -> bool {
        self.has(&Operation::DateShift)
    }

    pub fn is_perturbed(&self) -> bool {
        self.has(&Operation::Perturb) || self.has(&Operation::DateShift)
    }

    pub fn is_substituted(&self) -> bool {
        self.has(&Operation::Substitute)
    }
}
