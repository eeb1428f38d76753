//! Anonymization processors
//!
//! A processor transforms one target node. Applied to a composite node, a
//! processor works on every primitive descendant of that node which belongs to
//! the same record and has not been transformed yet; an earlier `keep` rule can
//! therefore exempt a single field from a broader rule.
//!
//! # Processors
//!
//! - [`RedactProcessor`] - Remove values, with optional partial redaction
//! - [`KeepProcessor`] - Leave values untouched
//! - [`CryptoHashProcessor`] - Keyed HMAC-SHA256 pseudonyms
//! - [`EncryptProcessor`] - Deterministic AES-CBC encryption
//! - [`DateShiftProcessor`] - Consistent per-entity date offsets
//! - [`PerturbProcessor`] - Bounded numeric noise
//! - [`SubstituteProcessor`] - Fixed replacement values
//! - [`GeneralizeProcessor`] - Case-based generalization with a fallback

pub mod crypto_hash;
pub mod date_shift;
pub mod encrypt;
pub mod generalize;
pub mod keep;
pub mod perturb;
pub mod redact;
pub mod substitute;

pub use crypto_hash::CryptoHashProcessor;
pub use date_shift::DateShiftProcessor;
pub use encrypt::EncryptProcessor;
pub use generalize::GeneralizeProcessor;
pub use keep::KeepProcessor;
pub use perturb::{NoiseFunction, PerturbProcessor, UniformNoise};
pub use redact::RedactProcessor;
pub use substitute::SubstituteProcessor;

use super::context::ProcessContext;
use super::result::ProcessResult;
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};

/// A transform applied to the node selected by a rule
pub trait Processor: Send + Sync + std::fmt::Debug {
    /// Method name the processor is registered under
    fn name(&self) -> &str;

    /// Transform `node` and report the operations performed
    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult>;
}

/// Primitive nodes a processor applied to `node` should transform
#[derive(Debug)]
pub(crate) struct Targets {
    /// Whether the rule selected a primitive directly
    pub explicit: bool,
    pub nodes: Vec<NodeId>,
}

pub(crate) fn targets(doc: &Document, node: NodeId, ctx: &ProcessContext) -> Targets {
    if doc.node(node).is_primitive() {
        let nodes = if has_value(doc, node) {
            vec![node]
        } else {
            Vec::new()
        };
        return Targets {
            explicit: true,
            nodes,
        };
    }

    let nodes = doc
        .scoped_descendants(node)
        .into_iter()
        .filter(|id| {
            doc.node(*id).is_primitive()
                && !ctx.is_visited(*id)
                && !is_structural(doc, *id)
                && has_value(doc, *id)
        })
        .collect();
    Targets {
        explicit: false,
        nodes,
    }
}

/// Elements that carry document structure rather than data
fn is_structural(doc: &Document, node: NodeId) -> bool {
    matches!(doc.node(node).name(), "resourceType" | "vr")
}

fn has_value(doc: &Document, node: NodeId) -> bool {
    !matches!(doc.node(node).value(), None | Some(Value::Null))
}

/// Processors that take no settings
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct NoSettings {}

/// Deserialize method settings, rejecting unknown keys
pub(crate) fn parse_settings<T: DeserializeOwned>(
    method: &str,
    settings: &Map<String, Value>,
) -> Result<T> {
    T::deserialize(Value::Object(settings.clone())).map_err(|e| {
        VeilError::Configuration(format!("Invalid settings for method '{method}': {e}"))
    })
}

/// Error for a processor applied to a node type it does not handle
pub(crate) fn unsupported(method: &str, doc: &Document, node: NodeId) -> VeilError {
    VeilError::UnsupportedNodeType {
        method: method.to_string(),
        node_type: doc.node(node).type_name().to_string(),
    }
}
