//! Substitution with a fixed replacement
//!
//! A primitive target takes the replacement value; for reference elements only
//! the identifier segment is replaced. An object target merges an object
//! replacement while keeping field order: shared fields are replaced where
//! they stand, replacement-only fields are appended in replacement order and
//! original-only fields are left alone. Fields already handled by an earlier
//! rule are never overwritten; a shared object holding such a field is merged
//! recursively. `replaceWith: null` is a real
//! replacement that writes `null`; omitting `replaceWith` is an error.

use super::{parse_settings, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::reference::transform_reference;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::json::build_detached;
use crate::document::{Document, NodeId, NodeKind};
use crate::domain::{Result, VeilError};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Method name
pub const NAME: &str = "substitute";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SubstituteSettings {
    #[serde(default, deserialize_with = "present")]
    replace_with: Option<Value>,
}

/// Keep an explicit `null` distinct from a missing key
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone)]
pub struct SubstituteProcessor {
    replace_with: Value,
}

impl SubstituteProcessor {
    pub fn new(replace_with: Value) -> Self {
        Self { replace_with }
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let settings: SubstituteSettings = parse_settings(NAME, settings)?;
        let replace_with = settings.replace_with.ok_or_else(|| {
            VeilError::Configuration("substitute requires a 'replaceWith' setting".to_string())
        })?;
        Ok(Self { replace_with })
    }

    fn substitute_primitive(&self, doc: &mut Document, node: NodeId) -> Result<()> {
        let replacement = match &self.replace_with {
            Value::Object(_) | Value::Array(_) => {
                return Err(shape_mismatch(doc, node, &self.replace_with));
            }
            Value::String(replacement) if doc.node(node).name() == "reference" => {
                match doc.node(node).value_str() {
                    Some(original) => {
                        Value::String(transform_reference(original, |_| replacement.clone()))
                    }
                    None => Value::String(replacement.clone()),
                }
            }
            other => other.clone(),
        };
        doc.set_value(node, Some(replacement));
        Ok(())
    }

    fn merge_object(
        &self,
        doc: &mut Document,
        node: NodeId,
        replacement: &Map<String, Value>,
        ctx: &ProcessContext,
        result: &mut ProcessResult,
    ) {
        let mut children = doc.node(node).children().to_vec();
        for (key, value) in replacement {
            match children
                .iter()
                .position(|child| doc.node(*child).name() == key)
            {
                Some(index) => {
                    let child = children[index];
                    if ctx.is_visited(child) {
                        continue;
                    }
                    if has_visited_descendant(doc, child, ctx) {
                        // Merge around fields an earlier rule already handled
                        if let (NodeKind::Object, Value::Object(nested)) =
                            (doc.node(child).kind(), value)
                        {
                            self.merge_object(doc, child, nested, ctx, result);
                        }
                        continue;
                    }
                    let built = build_detached(doc, node, key, value);
                    children[index] = built;
                    result.add(Operation::Substitute, built);
                }
                None => {
                    let built = build_detached(doc, node, key, value);
                    children.push(built);
                    result.add(Operation::Substitute, built);
                }
            }
        }
        doc.set_children(node, children);
    }

    /// Swap `node` for a freshly built node holding the replacement
    fn replace_node(&self, doc: &mut Document, node: NodeId) -> Result<NodeId> {
        let parent = doc.node(node).parent().ok_or_else(|| {
            VeilError::InvalidInput("Cannot substitute the document root".to_string())
        })?;
        let name = doc.node(node).name().to_string();
        let built = build_detached(doc, parent, &name, &self.replace_with);
        let children = doc
            .node(parent)
            .children()
            .iter()
            .map(|child| if *child == node { built } else { *child })
            .collect();
        doc.set_children(parent, children);
        Ok(built)
    }
}

impl Processor for SubstituteProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        let mut result = ProcessResult::new();
        match (doc.node(node).kind(), &self.replace_with) {
            (NodeKind::Primitive, _) => {
                self.substitute_primitive(doc, node)?;
                result.add(Operation::Substitute, node);
            }
            (NodeKind::Object, Value::Object(replacement)) => {
                self.merge_object(doc, node, replacement, ctx, &mut result);
            }
            (NodeKind::Array, Value::Array(_)) | (_, Value::Null) => {
                let built = self.replace_node(doc, node)?;
                result.add(Operation::Substitute, built);
            }
            _ => return Err(shape_mismatch(doc, node, &self.replace_with)),
        }
        Ok(result)
    }
}

fn has_visited_descendant(doc: &Document, node: NodeId, ctx: &ProcessContext) -> bool {
    doc.scoped_descendants(node)
        .into_iter()
        .any(|descendant| ctx.is_visited(descendant))
}

fn shape_mismatch(doc: &Document, node: NodeId, replacement: &Value) -> VeilError {
    let shape = match replacement {
        Value::Object(_) => "object",
        Value::Array(_) => "array",
        _ => "primitive",
    };
    VeilError::InvalidInput(format!(
        "Cannot substitute {} node '{}' with a {shape} value",
        doc.node(node).type_name(),
        doc.node(node).name()
    ))
}
