//! Case-based generalization
//!
//! A rule lists ordered cases, each pairing a condition with the value that
//! replaces a matching primitive:
//!
//! ```json
//! {
//!   "path": "Patient.address.city",
//!   "method": "generalize",
//!   "cases": [
//!     {"in": ["Springfield", "Shelbyville"], "value": "Midwest"},
//!     {"pattern": "^New .*", "value": "East"}
//!   ],
//!   "fallback": "redact"
//! }
//! ```
//!
//! Conditions are `range` (`[min, max)`, either bound may be `null`),
//! `pattern` (regex searched in the textual value), `equals` and `in`. The
//! first matching case wins and is recorded as an abstraction. Composite
//! targets, values no case can inspect and values no case matches are handed
//! to the fallback method.

use super::{parse_settings, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::registry::FallbackMethod;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Method name
pub const NAME: &str = "generalize";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GeneralizeSettings {
    cases: Vec<RawCase>,
    fallback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCase {
    range: Option<[Option<f64>; 2]>,
    pattern: Option<String>,
    equals: Option<Value>,
    #[serde(rename = "in")]
    one_of: Option<Vec<Value>>,
    value: Value,
}

#[derive(Debug, Clone)]
enum Condition {
    Range { min: Option<f64>, max: Option<f64> },
    Pattern(Regex),
    Equals(Value),
    OneOf(Vec<Value>),
}

impl Condition {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Range { min, max } => numeric(value).is_some_and(|n| {
                min.map_or(true, |min| n >= min) && max.map_or(true, |max| n < max)
            }),
            Condition::Pattern(regex) => text(value).is_some_and(|t| regex.is_match(&t)),
            Condition::Equals(expected) => values_equal(expected, value),
            Condition::OneOf(options) => options.iter().any(|o| values_equal(o, value)),
        }
    }
}

#[derive(Debug, Clone)]
struct Case {
    condition: Condition,
    value: Value,
}

impl TryFrom<RawCase> for Case {
    type Error = VeilError;

    fn try_from(raw: RawCase) -> Result<Self> {
        let mut conditions = Vec::new();
        if let Some([min, max]) = raw.range {
            conditions.push(Condition::Range { min, max });
        }
        if let Some(pattern) = raw.pattern {
            let regex = Regex::new(&pattern).map_err(|e| {
                VeilError::Configuration(format!("Invalid generalize pattern '{pattern}': {e}"))
            })?;
            conditions.push(Condition::Pattern(regex));
        }
        if let Some(expected) = raw.equals {
            conditions.push(Condition::Equals(expected));
        }
        if let Some(options) = raw.one_of {
            conditions.push(Condition::OneOf(options));
        }

        if conditions.len() != 1 {
            return Err(VeilError::Configuration(
                "Each generalize case needs exactly one of 'range', 'pattern', 'equals' or 'in'"
                    .to_string(),
            ));
        }
        if matches!(raw.value, Value::Object(_) | Value::Array(_)) {
            return Err(VeilError::Configuration(
                "Generalize case values must be primitive".to_string(),
            ));
        }

        Ok(Case {
            condition: conditions.remove(0),
            value: raw.value,
        })
    }
}

#[derive(Debug, Clone)]
pub struct GeneralizeProcessor {
    cases: Vec<Case>,
    fallback: Arc<dyn Processor>,
}

impl GeneralizeProcessor {
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let settings: GeneralizeSettings = parse_settings(NAME, settings)?;
        let cases = settings
            .cases
            .into_iter()
            .map(Case::try_from)
            .collect::<Result<Vec<_>>>()?;
        let fallback = FallbackMethod::from_value(NAME, settings.fallback.as_ref())?.build()?;
        Ok(Self { cases, fallback })
    }

    fn replacement(&self, value: &Value) -> Option<&Value> {
        self.cases
            .iter()
            .find(|case| case.condition.matches(value))
            .map(|case| &case.value)
    }
}

impl Processor for GeneralizeProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        if !doc.node(node).is_primitive() {
            return self.fallback.process(doc, node, ctx);
        }

        let replacement = doc
            .node(node)
            .value()
            .filter(|value| !value.is_null())
            .and_then(|value| self.replacement(value))
            .cloned();
        match replacement {
            Some(value) => {
                doc.set_value(node, Some(value));
                Ok(ProcessResult::single(Operation::Abstract, node))
            }
            None => self.fallback.process(doc, node, ctx),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality that treats `5` and `5.0` as the same number
fn values_equal(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => expected == actual,
    }
}
