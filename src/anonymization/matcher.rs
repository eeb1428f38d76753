//! Rule matching
//!
//! A rule applies to a node when every condition it declares holds: the type
//! filter equals the node's type name (`*` matches any type), the tag equals
//! the node's element name ignoring case, and the path expression selects the
//! node. Array containers are never matched; their items are.

use super::config::{Configuration, Rule, RuleMatcherSpec};
use crate::document::path::PathEvaluator;
use crate::document::{Document, NodeId};
use crate::domain::Result;
use std::sync::Arc;

/// A rule that applies to a node, with its declaration index
#[derive(Debug, Clone, Copy)]
pub struct MatchedRule<'a> {
    pub index: usize,
    pub rule: &'a Rule,
}

/// Finds the rules that apply to a node, in declaration order
#[derive(Clone)]
pub struct RuleMatcher {
    config: Arc<Configuration>,
    evaluator: Arc<dyn PathEvaluator>,
}

impl std::fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleMatcher")
            .field("rules", &self.config.rules.len())
            .finish()
    }
}

impl RuleMatcher {
    pub fn new(config: Arc<Configuration>, evaluator: Arc<dyn PathEvaluator>) -> Self {
        Self { config, evaluator }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// All rules applicable to `node`, in declaration order
    pub fn match_rules(&self, doc: &Document, node: NodeId) -> Result<Vec<MatchedRule<'_>>> {
        if doc.node(node).is_array() {
            return Ok(Vec::new());
        }

        let mut matched = Vec::new();
        for (index, rule) in self.config.rules.iter().enumerate() {
            if self.applies(&rule.matcher, doc, node)? {
                matched.push(MatchedRule { index, rule });
            }
        }
        Ok(matched)
    }

    /// The first applicable rule, which takes precedence over the others
    pub fn first_match(&self, doc: &Document, node: NodeId) -> Result<Option<MatchedRule<'_>>> {
        if doc.node(node).is_array() {
            return Ok(None);
        }

        for (index, rule) in self.config.rules.iter().enumerate() {
            if self.applies(&rule.matcher, doc, node)? {
                return Ok(Some(MatchedRule { index, rule }));
            }
        }
        Ok(None)
    }

    fn applies(&self, criteria: &RuleMatcherSpec, doc: &Document, node: NodeId) -> Result<bool> {
        let target = doc.node(node);

        if let Some(type_filter) = &criteria.type_filter {
            if type_filter != "*" && type_filter != target.type_name() {
                return Ok(false);
            }
        }

        if let Some(tag) = &criteria.tag {
            if !tag.eq_ignore_ascii_case(target.name()) {
                return Ok(false);
            }
        }

        match &criteria.path {
            Some(path) => self.evaluator.matches(path, doc, node),
            None => Ok(true),
        }
    }
}
