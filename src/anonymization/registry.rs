//! Processor registry
//!
//! Resolves the `method` of a rule to a [`Processor`]. Built-in methods are a
//! closed enum; applications add their own processors under new names:
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::{Map, Value};
//! use veil::anonymization::context::ProcessContext;
//! use veil::anonymization::processors::Processor;
//! use veil::anonymization::registry::{CustomProcessor, ProcessorRegistry};
//! use veil::anonymization::result::{Operation, ProcessResult};
//! use veil::document::{Document, NodeId};
//!
//! #[derive(Debug)]
//! struct MaskProcessor;
//!
//! impl Processor for MaskProcessor {
//!     fn name(&self) -> &str {
//!         "mask"
//!     }
//!
//!     fn process(
//!         &self,
//!         doc: &mut Document,
//!         node: NodeId,
//!         _ctx: &ProcessContext,
//!     ) -> veil::domain::Result<ProcessResult> {
//!         doc.set_value(node, Some(Value::String("***".into())));
//!         Ok(ProcessResult::single(Operation::Custom("mask".into()), node))
//!     }
//! }
//!
//! impl CustomProcessor for MaskProcessor {
//!     fn from_settings(_settings: &Map<String, Value>) -> veil::domain::Result<Self> {
//!         Ok(MaskProcessor)
//!     }
//! }
//!
//! let mut registry = ProcessorRegistry::new();
//! registry.register::<MaskProcessor>()?;
//! assert!(registry.create_processor("mask", &Map::new())?.is_some());
//! # Ok::<(), veil::domain::VeilError>(())
//! ```

use super::processors::{
    CryptoHashProcessor, DateShiftProcessor, EncryptProcessor, GeneralizeProcessor,
    KeepProcessor, PerturbProcessor, Processor, RedactProcessor, SubstituteProcessor,
};
use crate::domain::{Result, VeilError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Methods shipped with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinMethod {
    Redact,
    Keep,
    CryptoHash,
    Encrypt,
    DateShift,
    Perturb,
    Substitute,
    Generalize,
}

impl BuiltinMethod {
    pub const ALL: [BuiltinMethod; 8] = [
        BuiltinMethod::Redact,
        BuiltinMethod::Keep,
        BuiltinMethod::CryptoHash,
        BuiltinMethod::Encrypt,
        BuiltinMethod::DateShift,
        BuiltinMethod::Perturb,
        BuiltinMethod::Substitute,
        BuiltinMethod::Generalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinMethod::Redact => "redact",
            BuiltinMethod::Keep => "keep",
            BuiltinMethod::CryptoHash => "cryptoHash",
            BuiltinMethod::Encrypt => "encrypt",
            BuiltinMethod::DateShift => "dateShift",
            BuiltinMethod::Perturb => "perturb",
            BuiltinMethod::Substitute => "substitute",
            BuiltinMethod::Generalize => "generalize",
        }
    }

    /// Build the processor for this method from rule settings
    pub fn create(&self, settings: &Map<String, Value>) -> Result<Arc<dyn Processor>> {
        Ok(match self {
            BuiltinMethod::Redact => Arc::new(RedactProcessor::from_settings(settings)?),
            BuiltinMethod::Keep => Arc::new(KeepProcessor::from_settings(settings)?),
            BuiltinMethod::CryptoHash => Arc::new(CryptoHashProcessor::from_settings(settings)?),
            BuiltinMethod::Encrypt => Arc::new(EncryptProcessor::from_settings(settings)?),
            BuiltinMethod::DateShift => Arc::new(DateShiftProcessor::from_settings(settings)?),
            BuiltinMethod::Perturb => Arc::new(PerturbProcessor::from_settings(settings)?),
            BuiltinMethod::Substitute => Arc::new(SubstituteProcessor::from_settings(settings)?),
            BuiltinMethod::Generalize => Arc::new(GeneralizeProcessor::from_settings(settings)?),
        })
    }
}

impl FromStr for BuiltinMethod {
    type Err = VeilError;

    fn from_str(s: &str) -> Result<Self> {
        BuiltinMethod::ALL
            .into_iter()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| VeilError::Configuration(format!("Unknown method '{s}'")))
    }
}

impl fmt::Display for BuiltinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds a custom processor from rule settings
pub type ProcessorFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Processor>> + Send + Sync>;

/// A processor that can be registered by type
pub trait CustomProcessor: Processor + Sized + 'static {
    /// Build the processor from the settings of a rule
    fn from_settings(settings: &Map<String, Value>) -> Result<Self>;
}

/// Registry of built-in and custom processors
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    custom: HashMap<String, ProcessorFactory>,
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("ProcessorRegistry")
            .field("custom", &names)
            .finish()
    }
}

impl ProcessorRegistry {
    /// Registry with only the built-in methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`
    ///
    /// Names are case-insensitive and may not shadow a built-in method or an
    /// earlier custom registration.
    pub fn register_custom<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Processor>> + Send + Sync + 'static,
    {
        let key = name.trim().to_ascii_lowercase();
        if key.is_empty() {
            return Err(VeilError::Configuration(
                "Custom processor name cannot be empty".to_string(),
            ));
        }
        if key.parse::<BuiltinMethod>().is_ok() || self.custom.contains_key(&key) {
            return Err(VeilError::ProcessorNameConflict(name.to_string()));
        }

        tracing::debug!(processor = %key, "Registered custom processor");
        self.custom.insert(key, Arc::new(factory));
        Ok(())
    }

    /// Register `T` under a name derived from its type name
    ///
    /// `MaskProcessor` registers as `mask`, `Tokenize` as `tokenize`.
    pub fn register<T: CustomProcessor>(&mut self) -> Result<()> {
        let name = derive_name(std::any::type_name::<T>());
        self.register_custom(&name, |settings| {
            let processor: Arc<dyn Processor> = Arc::new(T::from_settings(settings)?);
            Ok(processor)
        })
    }

    /// Whether `method` resolves to a processor
    pub fn contains(&self, method: &str) -> bool {
        method.parse::<BuiltinMethod>().is_ok()
            || self.custom.contains_key(&method.to_ascii_lowercase())
    }

    /// Build the processor for `method`
    ///
    /// Returns `Ok(None)` for an unknown method and an error when the settings
    /// are invalid for a known one.
    pub fn create_processor(
        &self,
        method: &str,
        settings: &Map<String, Value>,
    ) -> Result<Option<Arc<dyn Processor>>> {
        if let Ok(builtin) = method.parse::<BuiltinMethod>() {
            return builtin.create(settings).map(Some);
        }
        match self.custom.get(&method.to_ascii_lowercase()) {
            Some(factory) => factory(settings).map(Some),
            None => Ok(None),
        }
    }
}

fn derive_name(type_name: &str) -> String {
    let base = type_name.split('<').next().unwrap_or(type_name);
    let last = base.rsplit("::").next().unwrap_or(base);
    let trimmed = match last.strip_suffix("Processor") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => last,
    };
    trimmed.to_ascii_lowercase()
}

/// Method used when a processor cannot handle a node itself
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackMethod {
    method: BuiltinMethod,
    settings: Map<String, Value>,
}

impl Default for FallbackMethod {
    fn default() -> Self {
        Self {
            method: BuiltinMethod::Redact,
            settings: Map::new(),
        }
    }
}

impl FallbackMethod {
    /// Parse a `fallback` setting of the `owner` method
    ///
    /// Accepts a method name (`"keep"`) or an object with `method` and that
    /// method's settings (`{"method": "substitute", "replaceWith": "x"}`).
    /// A missing setting falls back to redaction.
    pub fn from_value(owner: &str, value: Option<&Value>) -> Result<Self> {
        let (name, settings) = match value {
            None => return Ok(Self::default()),
            Some(Value::String(name)) => (name.as_str(), Map::new()),
            Some(Value::Object(map)) => {
                let name = map.get("method").and_then(Value::as_str).ok_or_else(|| {
                    VeilError::Configuration(format!(
                        "Fallback of '{owner}' needs a 'method' string"
                    ))
                })?;
                let mut settings = map.clone();
                settings.remove("method");
                (name, settings)
            }
            Some(other) => {
                return Err(VeilError::Configuration(format!(
                    "Invalid fallback for '{owner}': {other}"
                )))
            }
        };

        let method = name.parse::<BuiltinMethod>()?;
        if method == BuiltinMethod::Generalize {
            return Err(VeilError::Configuration(format!(
                "'{}' cannot be used as the fallback of '{owner}'",
                method
            )));
        }
        Ok(Self { method, settings })
    }

    pub fn method(&self) -> BuiltinMethod {
        self.method
    }

    /// Build the fallback processor
    pub fn build(&self) -> Result<Arc<dyn Processor>> {
        self.method.create(&self.settings)
    }
}
