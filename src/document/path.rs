//! Path expression evaluation
//!
//! Rules locate nodes with a path expression. The engine only needs a boolean
//! answer per (expression, node) pair, so evaluation sits behind the
//! [`PathEvaluator`] trait. [`SimplePathEvaluator`] covers the forms used by
//! rule files in practice:
//!
//! - dotted element paths relative to the enclosing record, whose first
//!   segment is the record type, `Resource` or `*` (`Patient.address.state`)
//! - `*` as a single-segment wildcard (`Patient.*.period`)
//! - `nodesByType('HumanName')` and `nodesByName('postalCode')`, optionally
//!   prefixed with a record type (`Patient.nodesByType('date')`)

use super::{Document, NodeId};
use crate::domain::{Result, VeilError};

/// Evaluates rule path expressions against document nodes
pub trait PathEvaluator: Send + Sync {
    /// Check that an expression is supported; called at configuration load
    fn validate(&self, expression: &str) -> Result<()>;

    /// Whether `expression` selects `node`
    fn matches(&self, expression: &str, doc: &Document, node: NodeId) -> Result<bool>;
}

/// Parsed form of a supported expression
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathExpression {
    Segments(Vec<String>),
    NodesByType {
        record: Option<String>,
        type_name: String,
    },
    NodesByName {
        record: Option<String>,
        name: String,
    },
}

/// Built-in evaluator for dotted paths and the `nodesBy*` functions
#[derive(Debug, Default, Clone)]
pub struct SimplePathEvaluator;

impl SimplePathEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn parse(expression: &str) -> Result<PathExpression> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(VeilError::Configuration(
                "Path expression must not be empty".to_string(),
            ));
        }

        for (function, is_type) in [("nodesByType(", true), ("nodesByName(", false)] {
            if let Some(position) = expression.find(function) {
                let prefix = &expression[..position];
                let record = match prefix.strip_suffix('.') {
                    Some(record) if is_identifier(record) => Some(record.to_string()),
                    None if prefix.is_empty() => None,
                    _ => return Err(unsupported(expression)),
                };
                let argument = expression[position + function.len()..]
                    .strip_suffix(')')
                    .and_then(unquote)
                    .ok_or_else(|| unsupported(expression))?;
                return Ok(if is_type {
                    PathExpression::NodesByType {
                        record,
                        type_name: argument,
                    }
                } else {
                    PathExpression::NodesByName {
                        record,
                        name: argument,
                    }
                });
            }
        }

        let segments: Vec<String> = expression.split('.').map(str::to_string).collect();
        if segments
            .iter()
            .any(|segment| segment != "*" && !is_identifier(segment))
        {
            return Err(unsupported(expression));
        }
        Ok(PathExpression::Segments(segments))
    }
}

impl PathEvaluator for SimplePathEvaluator {
    fn validate(&self, expression: &str) -> Result<()> {
        Self::parse(expression).map(|_| ())
    }

    fn matches(&self, expression: &str, doc: &Document, node: NodeId) -> Result<bool> {
        let parsed = Self::parse(expression)?;
        let matched = match parsed {
            PathExpression::Segments(segments) => {
                let actual = doc.path_segments(node);
                let in_record = doc.enclosing_record(node).is_some();
                actual.len() == segments.len()
                    && segments.iter().zip(actual.iter()).enumerate().all(
                        |(index, (expected, actual))| {
                            expected == "*"
                                || expected == actual
                                || (index == 0 && in_record && expected == "Resource")
                        },
                    )
            }
            PathExpression::NodesByType { record, type_name } => {
                doc.node(node).type_name() == type_name
                    && record_matches(doc, node, record.as_deref())
            }
            PathExpression::NodesByName { record, name } => {
                doc.node(node).name() == name && record_matches(doc, node, record.as_deref())
            }
        };
        Ok(matched)
    }
}

fn record_matches(doc: &Document, node: NodeId, record: Option<&str>) -> bool {
    match record {
        None | Some("*") | Some("Resource") => true,
        Some(expected) => doc
            .enclosing_record(node)
            .map(|record| doc.node(record).type_name() == expected)
            .unwrap_or(false),
    }
}

fn is_identifier(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn unquote(argument: &str) -> Option<String> {
    let argument = argument.trim();
    let inner = argument
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| argument.strip_prefix('"').and_then(|s| s.strip_suffix('"')))?;
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

fn unsupported(expression: &str) -> VeilError {
    VeilError::Configuration(format!("Unsupported path expression: '{expression}'"))
}
