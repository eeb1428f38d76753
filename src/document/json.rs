//! JSON document provider
//!
//! Builds a [`Document`] from a `serde_json::Value` and serializes it back.
//! Objects carrying a `resourceType` are record boundaries; entries of a
//! `contained` array are contained records. Objects keyed by an eight digit
//! hexadecimal tag with a `vr` member are treated as imaging-metadata elements
//! whose type is their value representation.
//!
//! Types of other nodes are inferred from their shape and element name, which
//! is enough for type-based rule filters such as `nodesByType('date')` or
//! `nodesByType('HumanName')`.

use super::{Document, Node, NodeId, NodeKind};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Name given to the root node when the document is not a record
pub const ROOT_NAME: &str = "$root";

fn date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{4}(-\d{2}(-\d{2})?)?$").expect("valid date regex"))
}

fn date_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:\d{2})?$")
            .expect("valid dateTime regex")
    })
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d{2}:\d{2}:\d{2}(\.\d+)?$").expect("valid time regex"))
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{8}$").expect("valid tag regex"))
}

/// Build a document from a JSON value
pub fn document_from_json(value: &Value) -> Document {
    let root_node = match value {
        Value::Object(map) => {
            let type_name = infer_object_type(ROOT_NAME, map);
            let name = if is_record(map) {
                type_name.clone()
            } else {
                ROOT_NAME.to_string()
            };
            let node = Node::new(name, type_name, NodeKind::Object);
            if is_record(map) {
                node.as_record(false)
            } else {
                node
            }
        }
        Value::Array(_) => Node::new(ROOT_NAME, "array", NodeKind::Array),
        other => Node::new(ROOT_NAME, infer_primitive_type(ROOT_NAME, other), NodeKind::Primitive)
            .with_value(other.clone()),
    };

    let mut doc = Document::new(root_node);
    let root = doc.root();
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                attach_json(&mut doc, root, key, child);
            }
        }
        Value::Array(items) => {
            for item in items {
                attach_json(&mut doc, root, ROOT_NAME, item);
            }
        }
        _ => {}
    }
    doc
}

/// Build the subtree for `value` and append it to `parent`
pub fn attach_json(doc: &mut Document, parent: NodeId, name: &str, value: &Value) -> NodeId {
    let id = build_detached(doc, parent, name, value);
    let mut children = doc.node(parent).children().to_vec();
    children.push(id);
    doc.set_children(parent, children);
    id
}

/// Build the subtree for `value` owned by `parent` without linking it
///
/// The caller decides where the new node goes in the parent's children.
pub fn build_detached(doc: &mut Document, parent: NodeId, name: &str, value: &Value) -> NodeId {
    let in_contained_array = doc.node(parent).is_array() && doc.node(parent).name() == "contained";
    match value {
        Value::Object(map) => {
            let mut node = Node::new(name, infer_object_type(name, map), NodeKind::Object);
            if is_record(map) {
                node = node.as_record(in_contained_array);
            }
            let id = doc.allocate(parent, node);
            let children: Vec<NodeId> = map
                .iter()
                .map(|(key, child)| build_detached(doc, id, key, child))
                .collect();
            doc.set_children(id, children);
            id
        }
        Value::Array(items) => {
            let id = doc.allocate(parent, Node::new(name, "array", NodeKind::Array));
            let children: Vec<NodeId> = items
                .iter()
                .map(|item| build_detached(doc, id, name, item))
                .collect();
            doc.set_children(id, children);
            id
        }
        primitive => {
            let node = Node::new(name, infer_primitive_type(name, primitive), NodeKind::Primitive)
                .with_value(primitive.clone());
            doc.allocate(parent, node)
        }
    }
}

/// Serialize the reachable part of a document back to JSON
///
/// Removed values are omitted, as are composites whose content was all
/// removed. Composites that were empty to begin with are kept.
pub fn document_to_json(doc: &Document) -> Value {
    let root = doc.root();
    match node_to_json(doc, root) {
        Some(value) => value,
        None => match doc.node(root).kind() {
            NodeKind::Object => Value::Object(Map::new()),
            NodeKind::Array => Value::Array(Vec::new()),
            NodeKind::Primitive => Value::Null,
        },
    }
}

/// Serialize a single node; `None` when the node has no content left
pub fn node_to_json(doc: &Document, id: NodeId) -> Option<Value> {
    serialize(doc, id).map(|(value, _)| value)
}

/// Serialized node plus whether it carries any primitive value
fn serialize(doc: &Document, id: NodeId) -> Option<(Value, bool)> {
    let node = doc.node(id);
    if node.is_primitive() {
        return node.value().cloned().map(|value| (value, true));
    }

    let children: Vec<(&str, Value, bool)> = node
        .children()
        .iter()
        .filter_map(|child| {
            serialize(doc, *child).map(|(value, content)| (doc.node(*child).name(), value, content))
        })
        .collect();

    // Emptied by processing, as opposed to empty in the input
    let content = children.iter().any(|(_, _, content)| *content);
    if !node.children().is_empty() && !content {
        return None;
    }

    let value = match node.kind() {
        NodeKind::Array => Value::Array(children.into_iter().map(|(_, value, _)| value).collect()),
        _ => Value::Object(
            children
                .into_iter()
                .map(|(name, value, _)| (name.to_string(), value))
                .collect(),
        ),
    };
    Some((value, content))
}

fn is_record(map: &Map<String, Value>) -> bool {
    map.get("resourceType").map(Value::is_string).unwrap_or(false)
}

/// Infer the type name of a primitive value
pub fn infer_primitive_type(name: &str, value: &Value) -> String {
    let type_name = match value {
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "decimal",
        Value::Null => "null",
        Value::String(s) => {
            if name == "id" {
                "id"
            } else if name == "div" {
                "xhtml"
            } else if date_time_regex().is_match(s) {
                "dateTime"
            } else if date_regex().is_match(s) && name != "code" && name != "value" {
                "date"
            } else if time_regex().is_match(s) {
                "time"
            } else if matches!(name, "url" | "uri" | "system")
                || s.starts_with("http://")
                || s.starts_with("https://")
                || s.starts_with("urn:")
            {
                "uri"
            } else if name == "code" {
                "code"
            } else {
                "string"
            }
        }
        Value::Array(_) | Value::Object(_) => "unknown",
    };
    type_name.to_string()
}

/// Infer the type name of an object from its members
pub fn infer_object_type(name: &str, map: &Map<String, Value>) -> String {
    if let Some(resource_type) = map.get("resourceType").and_then(Value::as_str) {
        return resource_type.to_string();
    }
    if tag_regex().is_match(name) {
        if let Some(vr) = map.get("vr").and_then(Value::as_str) {
            return vr.to_string();
        }
    }

    let has = |key: &str| map.contains_key(key);
    let type_name = if has("family") || has("given") {
        "HumanName"
    } else if ["line", "city", "district", "state", "postalCode", "country"]
        .iter()
        .any(|key| has(key))
    {
        "Address"
    } else if map.get("value").map(Value::is_number).unwrap_or(false)
        && (has("unit") || has("code") || has("system"))
    {
        if is_age_quantity(map) {
            "Age"
        } else {
            "Quantity"
        }
    } else if has("reference") {
        "Reference"
    } else if has("coding") {
        "CodeableConcept"
    } else if has("system") && has("code") {
        "Coding"
    } else if has("system") && has("value") {
        let system = map.get("system").and_then(Value::as_str).unwrap_or_default();
        if matches!(system, "phone" | "fax" | "email" | "pager" | "url" | "sms" | "other") {
            "ContactPoint"
        } else {
            "Identifier"
        }
    } else if !map.is_empty() && map.keys().all(|key| matches!(key.as_str(), "start" | "end" | "id")) {
        "Period"
    } else if has("contentType") {
        "Attachment"
    } else if name == "meta" {
        "Meta"
    } else if name == "extension" || name == "modifierExtension" {
        "Extension"
    } else {
        "BackboneElement"
    };
    type_name.to_string()
}

fn is_age_quantity(map: &Map<String, Value>) -> bool {
    let code = map.get("code").and_then(Value::as_str).unwrap_or_default();
    let unit = map
        .get("unit")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    code == "a" || matches!(unit.as_str(), "a" | "yr" | "yrs" | "year" | "years")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_order_and_values() {
        let value = json!({
            "resourceType": "Patient",
            "id": "example",
            "active": true,
            "name": [{"family": "Chalmers", "given": ["Peter", "James"]}],
            "birthDate": "1974-12-25"
        });
        let doc = document_from_json(&value);
        assert_eq!(document_to_json(&doc), value);
    }

    #[test]
    fn test_removed_values_are_pruned() {
        let value = json!({"resourceType": "Patient", "name": [{"family": "Doe"}]});
        let mut doc = document_from_json(&value);
        let family = doc
            .descendants(doc.root())
            .into_iter()
            .find(|id| doc.node(*id).name() == "family")
            .unwrap();
        doc.set_value(family, None);
        assert_eq!(document_to_json(&doc), json!({"resourceType": "Patient"}));
    }

    #[test]
    fn test_empty_containers_in_input_are_kept() {
        let value = json!({
            "resourceType": "Patient",
            "id": "p1",
            "extension": [],
            "meta": {},
            "contact": [{"telecom": [], "gender": "female"}],
            "gender": "male"
        });
        let doc = document_from_json(&value);
        assert_eq!(document_to_json(&doc), value);
    }

    #[test]
    fn test_emptied_composite_drops_nested_empty_containers() {
        let value = json!({
            "resourceType": "Patient",
            "address": [{"line": [], "city": "PleasantVille"}]
        });
        let mut doc = document_from_json(&value);
        let city = doc
            .descendants(doc.root())
            .into_iter()
            .find(|id| doc.node(*id).name() == "city")
            .unwrap();
        doc.set_value(city, None);
        assert_eq!(document_to_json(&doc), json!({"resourceType": "Patient"}));
    }

    #[test]
    fn test_explicit_null_is_emitted() {
        let value = json!({"resourceType": "Patient", "gender": "male"});
        let mut doc = document_from_json(&value);
        let gender = doc.child_by_name(doc.root(), "gender").unwrap();
        doc.set_value(gender, Some(Value::Null));
        assert_eq!(
            document_to_json(&doc),
            json!({"resourceType": "Patient", "gender": null})
        );
    }

    #[test]
    fn test_primitive_type_inference() {
        assert_eq!(infer_primitive_type("birthDate", &json!("1974-12-25")), "date");
        assert_eq!(infer_primitive_type("birthDate", &json!("1974")), "date");
        assert_eq!(
            infer_primitive_type("issued", &json!("2013-04-03T15:30:10+01:00")),
            "dateTime"
        );
        assert_eq!(infer_primitive_type("id", &json!("abc")), "id");
        assert_eq!(infer_primitive_type("value", &json!(12.5)), "decimal");
        assert_eq!(infer_primitive_type("count", &json!(3)), "integer");
        assert_eq!(infer_primitive_type("active", &json!(true)), "boolean");
        assert_eq!(infer_primitive_type("text", &json!("hello")), "string");
    }

    #[test]
    fn test_object_type_inference() {
        let address = json!({"line": ["1 Main St"], "city": "Springfield"});
        assert_eq!(
            infer_object_type("address", address.as_object().unwrap()),
            "Address"
        );
        let age = json!({"value": 42, "unit": "years", "system": "http://unitsofmeasure.org", "code": "a"});
        assert_eq!(infer_object_type("valueAge", age.as_object().unwrap()), "Age");
        let quantity = json!({"value": 72.5, "unit": "kg"});
        assert_eq!(
            infer_object_type("valueQuantity", quantity.as_object().unwrap()),
            "Quantity"
        );
        let element = json!({"vr": "PN", "Value": [{"Alphabetic": "Doe^John"}]});
        assert_eq!(infer_object_type("00100010", element.as_object().unwrap()), "PN");
    }
}
