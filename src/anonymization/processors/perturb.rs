//! Numeric perturbation
//!
//! Adds bounded noise to numeric values. The noise magnitude is the span
//! itself (`fixed`) or `span * |value|` (`proportional`); the default noise is
//! uniform in `[-magnitude, +magnitude]`. Results are rounded half away from
//! zero to `roundTo` fractional digits. Integer types are rounded to whole
//! numbers and clamped to their domain.
//!
//! Nodes whose type is outside the allow-list go to the fallback method.

use super::{parse_settings, targets, Processor};
use crate::anonymization::config::{validate_perturb_bounds, RangeType};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::registry::FallbackMethod;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use rand::Rng;
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Method name
pub const NAME: &str = "perturb";

/// Types perturbed when a rule does not override the list
pub const DEFAULT_TYPES: [&str; 9] = [
    "integer",
    "decimal",
    "unsignedInt",
    "positiveInt",
    "Quantity",
    "Age",
    "Duration",
    "Count",
    "Distance",
];

const INTEGER_TYPES: [&str; 3] = ["integer", "unsignedInt", "positiveInt"];

/// Largest rounding precision f64 can represent meaningfully
const MAX_EFFECTIVE_ROUND_TO: u32 = 15;

/// Source of perturbation noise
pub trait NoiseFunction: Send + Sync + std::fmt::Debug {
    /// Noise to add for a given magnitude
    fn noise(&self, magnitude: f64) -> f64;
}

/// Uniform noise in `[-magnitude, +magnitude]`
#[derive(Debug, Default, Clone, Copy)]
pub struct UniformNoise;

impl NoiseFunction for UniformNoise {
    fn noise(&self, magnitude: f64) -> f64 {
        if magnitude <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(-magnitude..=magnitude)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PerturbSettings {
    span: Option<f64>,
    round_to: Option<i64>,
    range_type: Option<RangeType>,
    types: Option<Vec<String>>,
    fallback: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct PerturbProcessor {
    span: Option<f64>,
    round_to: Option<u32>,
    range_type: Option<RangeType>,
    types: Vec<String>,
    fallback: Arc<dyn Processor>,
    noise: Arc<dyn NoiseFunction>,
}

impl PerturbProcessor {
    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let settings: PerturbSettings = parse_settings(NAME, settings)?;

        if let Some(span) = settings.span {
            validate_perturb_bounds(span, 0)?;
        }
        let round_to = settings
            .round_to
            .map(|round_to| validate_perturb_bounds(0.0, round_to))
            .transpose()?;

        let fallback = FallbackMethod::from_value(NAME, settings.fallback.as_ref())?.build()?;

        Ok(Self {
            span: settings.span,
            round_to,
            range_type: settings.range_type,
            types: settings
                .types
                .unwrap_or_else(|| DEFAULT_TYPES.iter().map(|t| t.to_string()).collect()),
            fallback,
            noise: Arc::new(UniformNoise),
        })
    }

    /// Replace the noise source
    pub fn with_noise(mut self, noise: Arc<dyn NoiseFunction>) -> Self {
        self.noise = noise;
        self
    }

    fn perturb_number(&self, value: f64, integer_type: Option<&str>, ctx: &ProcessContext) -> f64 {
        let params = ctx.parameters();
        let span = self.span.unwrap_or(params.perturb_span);
        let round_to = self.round_to.unwrap_or(params.perturb_round_to);
        let magnitude = match self.range_type.unwrap_or(params.perturb_range_type) {
            RangeType::Fixed => span,
            RangeType::Proportional => span * value.abs(),
        };

        let perturbed = value + self.noise.noise(magnitude);
        match integer_type {
            Some("unsignedInt") => perturbed.round().max(0.0),
            Some("positiveInt") => perturbed.round().max(1.0),
            Some(_) => perturbed.round(),
            None => round_half_away_from_zero(perturbed, round_to),
        }
    }

    /// Perturb one primitive numeric node
    fn perturb_primitive(
        &self,
        doc: &mut Document,
        node: NodeId,
        integer_type: Option<&str>,
        ctx: &ProcessContext,
    ) -> Result<()> {
        let (number, as_string) = match doc.node(node).value() {
            Some(Value::Number(n)) => (n.as_f64(), false),
            Some(Value::String(s)) => (s.trim().parse::<f64>().ok(), true),
            _ => (None, false),
        };
        let number = number.filter(|n| n.is_finite()).ok_or_else(|| {
            VeilError::InvalidInput(format!(
                "'{}' is not a numeric value",
                doc.node(node).value().map(Value::to_string).unwrap_or_default()
            ))
        })?;

        let perturbed = self.perturb_number(number, integer_type, ctx);
        let value = if as_string {
            Value::String(format_number(perturbed, integer_type.is_some()))
        } else if integer_type.is_some() {
            Value::Number(Number::from(perturbed as i64))
        } else {
            Number::from_f64(perturbed)
                .map(Value::Number)
                .ok_or_else(|| VeilError::InvalidInput(format!("{perturbed} is not finite")))?
        };
        doc.set_value(node, Some(value));
        Ok(())
    }

    fn is_allowed(&self, type_name: &str) -> bool {
        self.types.iter().any(|t| t == type_name)
    }
}

impl Processor for PerturbProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        let type_name = doc.node(node).type_name().to_string();
        if !self.is_allowed(&type_name) {
            return self.fallback.process(doc, node, ctx);
        }

        let mut result = ProcessResult::new();
        if doc.node(node).is_primitive() {
            let integer_type = INTEGER_TYPES.iter().find(|t| **t == type_name).copied();
            self.perturb_primitive(doc, node, integer_type, ctx)?;
            result.add(Operation::Perturb, node);
            return Ok(result);
        }

        // Quantity-like composites carry the number in their `value` element
        let value_node = targets(doc, node, ctx)
            .nodes
            .into_iter()
            .find(|id| doc.node(*id).name() == "value" && doc.node(*id).parent() == Some(node));
        match value_node {
            Some(value_node) => {
                let integer_type = (type_name == "Count"
                    && doc.node(value_node).type_name() == "integer")
                    .then_some("integer");
                self.perturb_primitive(doc, value_node, integer_type, ctx)?;
                result.add(Operation::Perturb, value_node);
                Ok(result)
            }
            None => self.fallback.process(doc, node, ctx),
        }
    }
}

/// Round half away from zero to `digits` fractional digits
///
/// Rounding works on the shortest decimal representation of the value, so
/// `2.345` rounds to `2.35` even though its binary value is slightly lower.
pub fn round_half_away_from_zero(value: f64, digits: u32) -> f64 {
    if digits > MAX_EFFECTIVE_ROUND_TO || !value.is_finite() {
        return value;
    }
    let digits = digits as usize;
    let text = value.abs().to_string();
    let (whole, fraction) = text.split_once('.').unwrap_or((text.as_str(), ""));
    if fraction.len() <= digits {
        return value;
    }

    let kept = if digits == 0 {
        whole.to_string()
    } else {
        format!("{whole}.{}", &fraction[..digits])
    };
    let Ok(truncated) = kept.parse::<f64>() else {
        return value;
    };
    let magnitude = if fraction.as_bytes()[digits] >= b'5' {
        truncated + 10f64.powi(-(digits as i32))
    } else {
        truncated
    };
    let magnitude = format!("{magnitude:.digits$}")
        .parse::<f64>()
        .unwrap_or(magnitude);
    magnitude.copysign(value)
}

fn format_number(value: f64, integer: bool) -> String {
    if integer {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
