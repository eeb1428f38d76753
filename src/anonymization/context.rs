//! Per-traversal processing context
//!
//! A [`ProcessContext`] lives for exactly one document traversal. It tracks
//! which nodes have already been transformed and the stack of open record
//! boundaries together with the result aggregated for each of them.

use super::config::{DateShiftScope, GlobalParameters};
use super::result::ProcessResult;
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use std::collections::HashSet;
use std::sync::Arc;

/// Mutable state of one traversal
#[derive(Debug)]
pub struct ProcessContext {
    visited: HashSet<NodeId>,
    stack: Vec<(NodeId, ProcessResult)>,
    unscoped: ProcessResult,
    parameters: Arc<GlobalParameters>,
    locator: String,
}

impl ProcessContext {
    /// Create a context for the item identified by `locator`
    pub fn new(parameters: Arc<GlobalParameters>, locator: impl Into<String>) -> Self {
        Self {
            visited: HashSet::new(),
            stack: Vec::new(),
            unscoped: ProcessResult::default(),
            parameters,
            locator: locator.into(),
        }
    }

    /// Global parameters of the active configuration
    pub fn parameters(&self) -> &GlobalParameters {
        &self.parameters
    }

    /// Locator of the item being processed
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn is_visited(&self, node: NodeId) -> bool {
        self.visited.contains(&node)
    }

    pub fn mark_visited(&mut self, node: NodeId) {
        self.visited.insert(node);
    }

    /// Mark a node and every descendant within its record as visited
    pub fn mark_subtree_visited(&mut self, doc: &Document, node: NodeId) {
        self.visited.insert(node);
        self.visited.extend(doc.scoped_descendants(node));
    }

    /// Open a record boundary
    pub fn push_record(&mut self, node: NodeId) {
        self.stack.push((node, ProcessResult::default()));
    }

    /// Close the record boundary `node`
    ///
    /// The popped entry must be `node`; anything else means the traversal lost
    /// track of record nesting and the document cannot be trusted.
    pub fn pop_record(&mut self, node: NodeId) -> Result<ProcessResult> {
        match self.stack.pop() {
            Some((top, result)) if top == node => Ok(result),
            Some((top, _)) => Err(VeilError::Processing(format!(
                "Context stack mismatch: leaving {node} but top of stack is {top}"
            ))),
            None => Err(VeilError::Processing(format!(
                "Context stack is empty when leaving {node}"
            ))),
        }
    }

    /// Number of open record boundaries
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Record a result against the innermost open record
    ///
    /// Results for nodes outside any record are kept separately and reported
    /// by [`ProcessContext::take_unscoped`].
    pub fn record(&mut self, result: &ProcessResult) {
        match self.stack.last_mut() {
            Some((_, top)) => top.update(result),
            None => self.unscoped.update(result),
        }
    }

    /// Result gathered outside any record boundary
    pub fn take_unscoped(&mut self) -> ProcessResult {
        std::mem::take(&mut self.unscoped)
    }

    /// Entity string the date-shift offset for `node` is derived from
    pub fn date_shift_entity(&self, doc: &Document, node: NodeId) -> String {
        let entity = match self.parameters.date_shift_scope {
            DateShiftScope::Resource => doc
                .enclosing_record(node)
                .and_then(|record| doc.record_id(record))
                .unwrap_or_default(),
            DateShiftScope::File => self.locator.clone(),
            DateShiftScope::Folder => String::new(),
        };
        format!("{}{}", self.parameters.date_shift_key_prefix, entity)
    }
}
