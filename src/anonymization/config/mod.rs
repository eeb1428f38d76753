//! Rule configuration
//!
//! A rule file declares ordered rules, global parameters and the processing
//! error policy:
//!
//! ```json
//! {
//!   "rules": [
//!     {"path": "Patient.address.state", "method": "keep"},
//!     {"type": "HumanName", "method": "redact"},
//!     {"tag": "(0010,0010)", "method": "cryptoHash"},
//!     {"path": "nodesByType('date')", "method": "dateShift"}
//!   ],
//!   "parameters": {"dateShiftKey": "secret", "enablePartialDatesForRedact": true},
//!   "processingError": "skip"
//! }
//! ```
//!
//! The same structure may be written in TOML. Validation happens once, before
//! any record is touched: every method resolves to a processor, every setting
//! is understood and every path expression is accepted by the evaluator. The
//! resulting [`Configuration`] is immutable and shared between workers.

mod parameters;
mod settings;

pub use parameters::{
    validate_encrypt_key, validate_perturb_bounds, DateShiftScope, GlobalParameters, RangeType,
    DEFAULT_AGE_OVER_THRESHOLD, DEFAULT_DATE_SHIFT_RANGE, MAX_ROUND_TO,
};
pub use settings::{AnonymizationConfig, AuditConfig};

use super::processors::Processor;
use super::registry::ProcessorRegistry;
use crate::config::loader::substitute_env_vars;
use crate::document::path::PathEvaluator;
use crate::domain::{Result, VeilError};
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Accepted names for the rule list
const RULE_KEYS: [&str; 3] = ["rules", "fhirPathRules", "dicomTagRules"];

const TOP_LEVEL_KEYS: [&str; 5] = [
    "rules",
    "fhirPathRules",
    "dicomTagRules",
    "parameters",
    "processingError",
];

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\(?([0-9A-Fa-f]{4}),\s*([0-9A-Fa-f]{4})\)?$").expect("valid tag regex")
    })
}

/// What to do when a record contains a value a processor cannot handle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingErrorPolicy {
    /// Fail the record; a job aborts
    #[default]
    Raise,
    /// Drop the record and continue
    Skip,
    /// Clear the offending value and continue
    IgnoreInvalid,
}

impl FromStr for ProcessingErrorPolicy {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raise" => Ok(ProcessingErrorPolicy::Raise),
            "skip" => Ok(ProcessingErrorPolicy::Skip),
            "ignoreinvalid" => Ok(ProcessingErrorPolicy::IgnoreInvalid),
            _ => Err(VeilError::Configuration(format!(
                "Invalid processingError '{s}'. Must be one of: raise, skip, ignoreInvalid"
            ))),
        }
    }
}

impl fmt::Display for ProcessingErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProcessingErrorPolicy::Raise => "raise",
            ProcessingErrorPolicy::Skip => "skip",
            ProcessingErrorPolicy::IgnoreInvalid => "ignoreInvalid",
        })
    }
}

/// Conditions a node must satisfy for a rule to apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleMatcherSpec {
    /// Node type name; `None` or `*` matches any type
    pub type_filter: Option<String>,
    /// Path expression checked by the evaluator
    pub path: Option<String>,
    /// Element name, `GGGGEEEE` for DICOM-style tags
    pub tag: Option<String>,
}

/// One validated rule
#[derive(Debug, Clone)]
pub struct Rule {
    pub matcher: RuleMatcherSpec,
    pub method: String,
    pub description: Option<String>,
    pub settings: Map<String, Value>,
    /// The rule as written, for diagnostics
    pub source_text: String,
    processor: Arc<dyn Processor>,
}

impl Rule {
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.matcher == other.matcher
            && self.method == other.method
            && self.description == other.description
            && self.settings == other.settings
            && self.source_text == other.source_text
    }
}

/// Validated rule configuration
#[derive(Debug, Clone)]
pub struct Configuration {
    pub rules: Vec<Rule>,
    pub parameters: Arc<GlobalParameters>,
    pub error_policy: ProcessingErrorPolicy,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.rules == other.rules
            && *self.parameters == *other.parameters
            && self.error_policy == other.error_policy
    }
}

impl Configuration {
    /// Validate a raw rule document
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Configuration`] for unknown keys, missing or empty
    /// rules, unknown methods, invalid settings, unsupported path expressions
    /// and invalid parameters.
    pub fn from_value(
        raw: &Value,
        registry: &ProcessorRegistry,
        evaluator: &dyn PathEvaluator,
    ) -> Result<Self> {
        let object = raw.as_object().ok_or_else(|| {
            VeilError::Configuration("Rule configuration must be an object".to_string())
        })?;

        if let Some(unknown) = object
            .keys()
            .find(|key| !TOP_LEVEL_KEYS.contains(&key.as_str()))
        {
            return Err(VeilError::Configuration(format!(
                "Unknown configuration key '{unknown}'"
            )));
        }

        let present: Vec<&str> = RULE_KEYS
            .into_iter()
            .filter(|key| object.contains_key(*key))
            .collect();
        let rules_key = match present.as_slice() {
            [key] => *key,
            [] => {
                return Err(VeilError::Configuration(
                    "Rule configuration must contain 'rules'".to_string(),
                ))
            }
            _ => {
                return Err(VeilError::Configuration(format!(
                    "Only one rule list may be given, found: {}",
                    present.join(", ")
                )))
            }
        };

        let raw_rules = object[rules_key].as_array().ok_or_else(|| {
            VeilError::Configuration(format!("'{rules_key}' must be an array"))
        })?;
        if raw_rules.is_empty() {
            return Err(VeilError::Configuration(
                "At least one rule is required".to_string(),
            ));
        }

        let rules = raw_rules
            .iter()
            .enumerate()
            .map(|(index, rule)| parse_rule(index, rule, registry, evaluator))
            .collect::<Result<Vec<_>>>()?;

        let parameters = GlobalParameters::from_value(object.get("parameters"))?;

        let error_policy = match object.get("processingError") {
            None | Some(Value::Null) => ProcessingErrorPolicy::default(),
            Some(Value::String(policy)) => policy.parse()?,
            Some(other) => {
                return Err(VeilError::Configuration(format!(
                    "processingError must be a string, found {other}"
                )))
            }
        };

        tracing::debug!(
            rules = rules.len(),
            error_policy = %error_policy,
            "Validated rule configuration"
        );

        Ok(Self {
            rules,
            parameters: Arc::new(parameters),
            error_policy,
        })
    }
}

fn parse_rule(
    index: usize,
    raw: &Value,
    registry: &ProcessorRegistry,
    evaluator: &dyn PathEvaluator,
) -> Result<Rule> {
    let source_text = serde_json::to_string(raw)?;
    let invalid = |message: String| {
        VeilError::Configuration(format!("Rule {index} {source_text}: {message}"))
    };

    let object = raw
        .as_object()
        .ok_or_else(|| invalid("rule must be an object".to_string()))?;

    let mut settings = object.clone();
    let mut take_string = |key: &str| -> Result<Option<String>> {
        match settings.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(invalid(format!("'{key}' must be a string, found {other}"))),
        }
    };

    let method = take_string("method")?
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| invalid("'method' is required".to_string()))?;
    let path = take_string("path")?;
    let tag = take_string("tag")?;
    let type_filter = take_string("type")?;
    let description = take_string("description")?;

    if path.is_none() && tag.is_none() && type_filter.is_none() {
        return Err(invalid(
            "at least one of 'path', 'tag' or 'type' is required".to_string(),
        ));
    }

    if let Some(path) = &path {
        evaluator.validate(path).map_err(|e| invalid(e.to_string()))?;
    }

    let processor = registry
        .create_processor(&method, &settings)
        .map_err(|e| invalid(e.to_string()))?
        .ok_or_else(|| invalid(format!("unknown method '{method}'")))?;

    Ok(Rule {
        matcher: RuleMatcherSpec {
            type_filter,
            path,
            tag: tag.map(|t| normalize_tag(&t)),
        },
        method,
        description,
        settings,
        source_text,
        processor,
    })
}

/// Normalize `(gggg,eeee)` to `GGGGEEEE`; other tags are kept as written
pub fn normalize_tag(tag: &str) -> String {
    let tag = tag.trim();
    match tag_regex().captures(tag) {
        Some(caps) => format!("{}{}", &caps[1], &caps[2]).to_ascii_uppercase(),
        None => tag.to_string(),
    }
}

/// Load and validate a rule file
///
/// The format follows the extension (`.json` or `.toml`). `${VAR}`
/// placeholders are substituted from the environment before parsing.
///
/// # Examples
///
/// ```no_run
/// use veil::anonymization::config::load_rule_configuration;
/// use veil::anonymization::registry::ProcessorRegistry;
/// use veil::document::path::SimplePathEvaluator;
///
/// let config = load_rule_configuration(
///     "rules.json",
///     &ProcessorRegistry::new(),
///     &SimplePathEvaluator::new(),
/// )?;
/// println!("{} rules", config.rules.len());
/// # Ok::<(), veil::domain::VeilError>(())
/// ```
pub fn load_rule_configuration(
    path: impl AsRef<Path>,
    registry: &ProcessorRegistry,
    evaluator: &dyn PathEvaluator,
) -> Result<Configuration> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        VeilError::Configuration(format!(
            "Failed to read rule file {}: {}",
            path.display(),
            e
        ))
    })?;
    let contents = substitute_env_vars(&contents)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let raw: Value = match extension.as_str() {
        "json" => serde_json::from_str(&contents).map_err(|e| {
            VeilError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?,
        "toml" => {
            let value: toml::Value = toml::from_str(&contents)?;
            serde_json::to_value(value)?
        }
        _ => {
            return Err(VeilError::Configuration(format!(
                "Unsupported rule file format: {}",
                path.display()
            )))
        }
    };

    let config = Configuration::from_value(&raw, registry, evaluator)?;
    tracing::info!(
        path = %path.display(),
        rules = config.rules.len(),
        "Loaded rule configuration"
    );
    Ok(config)
}
