//! Arena-backed document tree
//!
//! The anonymization engine works on a [`Document`]: a tree of nodes stored in
//! an arena and addressed by [`NodeId`] handles. Node identity is the arena
//! index, so identity checks are a plain integer comparison and a handle stays
//! valid while the tree is being rewritten. Nodes that are unlinked from their
//! parent stay in the arena and are simply no longer reachable from the root.
//!
//! # Modules
//!
//! - [`json`] - Building documents from `serde_json::Value` and serializing back
//! - [`path`] - Path expression evaluation used by rule matching

pub mod json;
pub mod path;

use serde::Serialize;
use serde_json::Value;

/// Handle of a node inside a [`Document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index of the node
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structural kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A JSON object (resource, complex datatype, backbone element)
    Object,
    /// A JSON array; a transparent container for repeated elements
    Array,
    /// A primitive value
    Primitive,
}

/// A single node of the document tree
#[derive(Debug, Clone)]
pub struct Node {
    name: String,
    type_name: String,
    kind: NodeKind,
    value: Option<Value>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    record: bool,
    contained: bool,
}

impl Node {
    /// Create a new node
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            kind,
            value: None,
            children: Vec::new(),
            parent: None,
            record: false,
            contained: false,
        }
    }

    /// Set the primitive value
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Mark the node as a record boundary
    pub fn as_record(mut self, contained: bool) -> Self {
        self.record = true;
        self.contained = contained;
        self
    }

    /// Element name (field name in the parent object)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name (resource type, datatype or primitive type)
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Structural kind
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Primitive value; `None` means the value was removed
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Ordered children
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Parent handle
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Whether this node is a top-level or nested record boundary
    pub fn is_record(&self) -> bool {
        self.record
    }

    /// Whether this record is contained inside another record
    pub fn is_contained(&self) -> bool {
        self.contained
    }

    /// Whether this node holds a primitive value
    pub fn is_primitive(&self) -> bool {
        self.kind == NodeKind::Primitive
    }

    /// Whether this node is an array container
    pub fn is_array(&self) -> bool {
        self.kind == NodeKind::Array
    }

    /// String view of the primitive value
    pub fn value_str(&self) -> Option<&str> {
        self.value.as_ref().and_then(Value::as_str)
    }
}

/// Arena-backed hierarchical document
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Create a document with the given root node
    pub fn new(root: Node) -> Self {
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    /// Root handle
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of nodes ever allocated in the arena
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the arena only holds the root
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    /// Borrow a node
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Allocate a node owned by `parent` without linking it into the children list
    pub fn allocate(&mut self, parent: NodeId, mut node: Node) -> NodeId {
        node.parent = Some(parent);
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Allocate a node and append it to `parent`'s children
    pub fn append_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.allocate(parent, node);
        self.node_mut(parent).children.push(id);
        id
    }

    /// Replace the ordered children of a node
    pub fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        for child in &children {
            self.node_mut(*child).parent = Some(id);
        }
        self.node_mut(id).children = children;
    }

    /// Set or remove the primitive value of a node
    pub fn set_value(&mut self, id: NodeId, value: Option<Value>) {
        self.node_mut(id).value = value;
    }

    /// Change the type name of a node
    pub fn set_type_name(&mut self, id: NodeId, type_name: impl Into<String>) {
        self.node_mut(id).type_name = type_name.into();
    }

    /// First child with the given element name
    pub fn child_by_name(&self, id: NodeId, name: &str) -> Option<NodeId> {
        self.node(id)
            .children
            .iter()
            .copied()
            .find(|child| self.node(*child).name == name)
    }

    /// All descendants in pre-order, excluding `id` itself
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.collect_descendants(id, false)
    }

    /// Descendants in pre-order that belong to the same record as `id`
    ///
    /// Nested record boundaries and their subtrees are excluded.
    pub fn scoped_descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.collect_descendants(id, true)
    }

    fn collect_descendants(&self, id: NodeId, stop_at_records: bool) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if stop_at_records && node.record {
                continue;
            }
            out.push(current);
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// Nearest ancestor-or-self that is a record boundary
    pub fn enclosing_record(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if node.record {
                return Some(node_id);
            }
            current = node.parent;
        }
        None
    }

    /// Logical identifier of a record (its `id` element)
    pub fn record_id(&self, record: NodeId) -> Option<String> {
        let id_node = self.child_by_name(record, "id")?;
        match self.node(id_node).value.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Element path of a node relative to its enclosing record
    ///
    /// The first segment is the record's type name; array containers are
    /// transparent. A node outside any record gets the element names from
    /// below the root.
    pub fn path_segments(&self, id: NodeId) -> Vec<&str> {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id);
            if node.record {
                segments.push(node.type_name.as_str());
                break;
            }
            if node.parent.is_none() {
                break;
            }
            if node.kind != NodeKind::Array {
                segments.push(node.name.as_str());
            }
            current = node.parent;
        }
        segments.reverse();
        segments
    }

    /// Whether `ancestor` is a strict ancestor of `id`
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = self.node(id).parent;
        while let Some(node_id) = current {
            if node_id == ancestor {
                return true;
            }
            current = self.node(node_id).parent;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Document {
        json::document_from_json(&json!({
            "resourceType": "Patient",
            "id": "p1",
            "name": [{"family": "Doe", "given": ["John"]}],
            "contained": [{"resourceType": "Practitioner", "id": "dr1"}]
        }))
    }

    #[test]
    fn test_root_is_record() {
        let doc = sample();
        let root = doc.node(doc.root());
        assert!(root.is_record());
        assert_eq!(root.type_name(), "Patient");
        assert_eq!(doc.record_id(doc.root()), Some("p1".to_string()));
    }

    #[test]
    fn test_path_segments_skip_arrays() {
        let doc = sample();
        let given = doc
            .descendants(doc.root())
            .into_iter()
            .find(|id| doc.node(*id).name() == "given" && doc.node(*id).is_primitive())
            .unwrap();
        assert_eq!(doc.path_segments(given), vec!["Patient", "name", "given"]);
    }

    #[test]
    fn test_scoped_descendants_stop_at_nested_records() {
        let doc = sample();
        let scoped = doc.scoped_descendants(doc.root());
        assert!(scoped
            .iter()
            .all(|id| doc.node(*id).type_name() != "Practitioner"));
        let all = doc.descendants(doc.root());
        assert!(all.len() > scoped.len());
    }

    #[test]
    fn test_contained_record_paths_start_at_own_type() {
        let doc = sample();
        let practitioner = doc
            .descendants(doc.root())
            .into_iter()
            .find(|id| doc.node(*id).type_name() == "Practitioner")
            .unwrap();
        assert!(doc.node(practitioner).is_contained());
        let id_node = doc.child_by_name(practitioner, "id").unwrap();
        assert_eq!(doc.path_segments(id_node), vec!["Practitioner", "id"]);
        assert_eq!(doc.enclosing_record(id_node), Some(practitioner));
        assert!(doc.is_ancestor(doc.root(), id_node));
    }
}
