//! Document traversal
//!
//! [`walk`] drives a [`NodeVisitor`] over a document in pre-order with a
//! matching post-order callback. [`AnonymizationVisitor`] is the visitor that
//! applies rules: it finds the first applicable rule of each node, honours
//! rule precedence over ancestors, aggregates results per record and writes
//! security labels into `meta.security`.

use super::config::ProcessingErrorPolicy;
use super::context::ProcessContext;
use super::matcher::{MatchedRule, RuleMatcher};
use super::processors::RedactProcessor;
use super::result::ProcessResult;
use crate::document::json::build_detached;
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use serde_json::{json, Value};

/// Code system of the security labels written to `meta.security`
pub const SECURITY_LABEL_SYSTEM: &str =
    "http://terminology.hl7.org/CodeSystem/v3-ObservationValue";

/// Callbacks invoked by [`walk`]
pub trait NodeVisitor {
    /// Called before the children of `node`; return `false` to skip them
    fn visit(&mut self, doc: &mut Document, node: NodeId) -> Result<bool>;

    /// Called after the children of `node`
    fn end_visit(&mut self, doc: &mut Document, node: NodeId) -> Result<()>;
}

enum Step {
    Enter(NodeId),
    Leave(NodeId),
}

/// Walk the subtree at `root` with an explicit stack
///
/// Children are read after `visit` returns, so a visitor may rewrite the
/// children of the node it is visiting. `end_visit` is called for every
/// visited node, including those whose children were skipped.
pub fn walk<V: NodeVisitor + ?Sized>(
    doc: &mut Document,
    root: NodeId,
    visitor: &mut V,
) -> Result<()> {
    let mut stack = vec![Step::Enter(root)];
    while let Some(step) = stack.pop() {
        match step {
            Step::Enter(node) => {
                let descend = visitor.visit(doc, node)?;
                stack.push(Step::Leave(node));
                if descend {
                    stack.extend(
                        doc.node(node)
                            .children()
                            .iter()
                            .rev()
                            .map(|child| Step::Enter(*child)),
                    );
                }
            }
            Step::Leave(node) => visitor.end_visit(doc, node)?,
        }
    }
    Ok(())
}

/// Lifecycle of an [`AnonymizationVisitor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitorState {
    Idle,
    Traversing,
    Done,
}

/// Applies the rules of a [`RuleMatcher`] during one traversal
#[derive(Debug)]
pub struct AnonymizationVisitor<'a> {
    matcher: &'a RuleMatcher,
    ctx: ProcessContext,
    policy: ProcessingErrorPolicy,
    add_labels: bool,
    state: VisitorState,
    root: Option<NodeId>,
    total: ProcessResult,
}

impl<'a> AnonymizationVisitor<'a> {
    pub fn new(matcher: &'a RuleMatcher, ctx: ProcessContext) -> Self {
        let config = matcher.configuration();
        Self {
            policy: config.error_policy,
            add_labels: config.parameters.add_security_labels,
            matcher,
            ctx,
            state: VisitorState::Idle,
            root: None,
            total: ProcessResult::new(),
        }
    }

    pub fn state(&self) -> VisitorState {
        self.state
    }

    /// Aggregate result of the finished traversal
    ///
    /// # Errors
    ///
    /// Returns [`VeilError::Processing`] if the traversal did not complete or
    /// left record boundaries open.
    pub fn finish(self) -> Result<ProcessResult> {
        if self.state != VisitorState::Done {
            return Err(VeilError::Processing(
                "Traversal finished before reaching the end of the document".to_string(),
            ));
        }
        if self.ctx.depth() != 0 {
            return Err(VeilError::Processing(format!(
                "{} record boundaries left open after traversal",
                self.ctx.depth()
            )));
        }
        Ok(self.total)
    }

    /// Apply `matched` to `node`, first giving descendants whose own first
    /// rule is declared earlier the chance to run
    fn apply_with_precedence(
        &mut self,
        doc: &mut Document,
        node: NodeId,
        matched: MatchedRule<'a>,
    ) -> Result<()> {
        if !doc.node(node).is_primitive() {
            let matcher = self.matcher;
            for descendant in doc.scoped_descendants(node) {
                if self.ctx.is_visited(descendant) || doc.node(descendant).is_array() {
                    continue;
                }
                if let Some(earlier) = matcher.first_match(doc, descendant)? {
                    if earlier.index < matched.index {
                        self.apply_with_precedence(doc, descendant, earlier)?;
                    }
                }
            }
        }

        let result = self.run(doc, node, matched)?;
        tracing::trace!(
            node = %node,
            rule = matched.index,
            method = %matched.rule.method,
            "Applied rule"
        );
        self.ctx.record(&result);
        self.total.update(&result);
        self.ctx.mark_subtree_visited(doc, node);
        Ok(())
    }

    fn run(
        &mut self,
        doc: &mut Document,
        node: NodeId,
        matched: MatchedRule<'a>,
    ) -> Result<ProcessResult> {
        match matched.rule.processor().process(doc, node, &self.ctx) {
            Ok(result) => Ok(result),
            Err(e) if e.is_invalid_input() && self.policy == ProcessingErrorPolicy::IgnoreInvalid => {
                tracing::warn!(
                    locator = %self.ctx.locator(),
                    node = %node,
                    rule = %matched.rule.source_text,
                    error = %e,
                    "Invalid value cleared"
                );
                Ok(RedactProcessor::clear(doc, node, &self.ctx))
            }
            Err(e) => Err(e),
        }
    }
}

impl NodeVisitor for AnonymizationVisitor<'_> {
    fn visit(&mut self, doc: &mut Document, node: NodeId) -> Result<bool> {
        match self.state {
            VisitorState::Idle => {
                self.state = VisitorState::Traversing;
                self.root = Some(node);
            }
            VisitorState::Traversing => {}
            VisitorState::Done => {
                return Err(VeilError::Processing(
                    "Visitor reused after its traversal finished".to_string(),
                ))
            }
        }

        if doc.node(node).is_record() {
            self.ctx.push_record(node);
        }

        if doc.node(node).is_array() || self.ctx.is_visited(node) {
            return Ok(true);
        }

        let matcher = self.matcher;
        if let Some(matched) = matcher.first_match(doc, node)? {
            self.apply_with_precedence(doc, node, matched)?;
        }
        Ok(true)
    }

    fn end_visit(&mut self, doc: &mut Document, node: NodeId) -> Result<()> {
        if doc.node(node).is_record() {
            let result = self.ctx.pop_record(node)?;
            let outermost = self.ctx.depth() == 0;
            if !outermost {
                self.ctx.record(&result);
            }

            let skip_label = outermost && doc.node(node).is_contained();
            if self.add_labels && !result.is_empty() && !skip_label {
                add_security_labels(doc, node, &result)?;
            }
        }

        if self.root == Some(node) {
            self.state = VisitorState::Done;
        }
        Ok(())
    }
}

/// Add one label per distinct operation code to `meta.security` of `record`
pub fn add_security_labels(doc: &mut Document, record: NodeId, result: &ProcessResult) -> Result<()> {
    let meta = match doc.child_by_name(record, "meta") {
        Some(meta) => meta,
        None => insert_meta(doc, record),
    };
    if !matches!(doc.node(meta).kind(), crate::document::NodeKind::Object) {
        return Err(VeilError::InvalidInput(
            "'meta' must be an object to carry security labels".to_string(),
        ));
    }

    let security = match doc.child_by_name(meta, "security") {
        Some(security) => security,
        None => {
            let security = build_detached(doc, meta, "security", &json!([]));
            let mut children = doc.node(meta).children().to_vec();
            children.push(security);
            doc.set_children(meta, children);
            security
        }
    };
    if !doc.node(security).is_array() {
        return Err(VeilError::InvalidInput(
            "'meta.security' must be an array".to_string(),
        ));
    }

    let mut codes: Vec<String> = doc
        .node(security)
        .children()
        .iter()
        .filter_map(|label| doc.child_by_name(*label, "code"))
        .filter_map(|code| doc.node(code).value_str().map(str::to_string))
        .collect();

    let mut labels = doc.node(security).children().to_vec();
    for operation in result.operations() {
        let code = operation.security_code();
        if codes.iter().any(|existing| existing == code) {
            continue;
        }
        let label = json!({
            "system": SECURITY_LABEL_SYSTEM,
            "code": code,
            "display": operation.security_display(),
        });
        labels.push(build_detached(doc, security, "security", &label));
        codes.push(code.to_string());
    }
    doc.set_children(security, labels);
    Ok(())
}

/// Create an empty `meta` after `id` (or `resourceType`) of a record
fn insert_meta(doc: &mut Document, record: NodeId) -> NodeId {
    let meta = build_detached(doc, record, "meta", &Value::Object(Default::default()));
    let mut children = doc.node(record).children().to_vec();
    let position = ["id", "resourceType"]
        .iter()
        .find_map(|name| {
            children
                .iter()
                .position(|child| doc.node(*child).name() == *name)
        })
        .map(|index| index + 1)
        .unwrap_or(0);
    children.insert(position, meta);
    doc.set_children(record, children);
    meta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymization::config::Configuration;
    use crate::anonymization::registry::ProcessorRegistry;
    use crate::document::json::{document_from_json, document_to_json};
    use crate::document::path::{PathEvaluator, SimplePathEvaluator};
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    fn matcher(config: Value) -> RuleMatcher {
        let evaluator = Arc::new(SimplePathEvaluator::new());
        let config =
            Configuration::from_value(&config, &ProcessorRegistry::new(), evaluator.as_ref())
                .unwrap();
        RuleMatcher::new(Arc::new(config), evaluator)
    }

    fn anonymize(matcher: &RuleMatcher, value: Value) -> Result<(Value, ProcessResult)> {
        let mut doc = document_from_json(&value);
        let ctx = ProcessContext::new(matcher.configuration().parameters.clone(), "test.json");
        let mut visitor = AnonymizationVisitor::new(matcher, ctx);
        let root = doc.root();
        walk(&mut doc, root, &mut visitor)?;
        let result = visitor.finish()?;
        Ok((document_to_json(&doc), result))
    }

    /// Records the order of callbacks
    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl NodeVisitor for Recorder {
        fn visit(&mut self, doc: &mut Document, node: NodeId) -> Result<bool> {
            self.0.push(format!("+{}", doc.node(node).name()));
            Ok(doc.node(node).name() != "skip")
        }

        fn end_visit(&mut self, doc: &mut Document, node: NodeId) -> Result<()> {
            self.0.push(format!("-{}", doc.node(node).name()));
            Ok(())
        }
    }

    #[test]
    fn test_walk_order() {
        let mut doc = document_from_json(&json!({"a": {"b": 1}, "skip": {"c": 2}}));
        let mut recorder = Recorder::default();
        let root = doc.root();
        walk(&mut doc, root, &mut recorder).unwrap();
        assert_eq!(
            recorder.0,
            vec!["+$root", "+a", "+b", "-b", "-a", "+skip", "-skip", "-$root"]
        );
    }

    #[test]
    fn test_keep_exempts_field_from_broader_rule() {
        let matcher = matcher(json!({
            "rules": [
                {"path": "Patient.address.state", "method": "keep"},
                {"path": "Patient.address", "method": "redact"}
            ]
        }));
        let (output, result) = anonymize(
            &matcher,
            json!({
                "resourceType": "Patient",
                "address": [{"city": "Springfield", "state": "IL"}]
            }),
        )
        .unwrap();
        assert_eq!(output["address"], json!([{"state": "IL"}]));
        assert!(result.is_redacted());
    }

    #[test]
    fn test_earlier_rule_wins_over_ancestor_rule() {
        let matcher = matcher(json!({
            "rules": [
                {"path": "Patient.name.family", "method": "cryptoHash"},
                {"path": "Patient.name", "method": "redact"}
            ],
            "parameters": {"cryptoHashKey": "k"}
        }));
        let (output, result) = anonymize(
            &matcher,
            json!({"resourceType": "Patient", "name": [{"family": "Doe", "given": ["John"]}]}),
        )
        .unwrap();
        let family = output["name"][0]["family"].as_str().unwrap();
        assert_eq!(family.len(), 64);
        assert!(output["name"][0].get("given").is_none());
        assert!(result.is_crypto_hashed());
        assert!(result.is_redacted());
    }

    /// Records every path evaluation
    struct CountingEvaluator {
        inner: SimplePathEvaluator,
        calls: Mutex<Vec<(String, NodeId)>>,
    }

    impl PathEvaluator for CountingEvaluator {
        fn validate(&self, expression: &str) -> Result<()> {
            self.inner.validate(expression)
        }

        fn matches(&self, expression: &str, doc: &Document, node: NodeId) -> Result<bool> {
            self.calls.lock().unwrap().push((expression.to_string(), node));
            self.inner.matches(expression, doc, node)
        }
    }

    #[test]
    fn test_nested_precedence_matches_each_node_once() {
        let evaluator = Arc::new(CountingEvaluator {
            inner: SimplePathEvaluator::new(),
            calls: Mutex::new(Vec::new()),
        });
        let config = Configuration::from_value(
            &json!({
                "rules": [
                    {"path": "Patient.contact.name.family", "method": "keep"},
                    {"path": "Patient.contact.name", "method": "redact"},
                    {"path": "Patient.contact", "method": "redact"}
                ]
            }),
            &ProcessorRegistry::new(),
            evaluator.as_ref(),
        )
        .unwrap();
        let matcher = RuleMatcher::new(Arc::new(config), evaluator.clone());

        let (output, _) = anonymize(
            &matcher,
            json!({
                "resourceType": "Patient",
                "contact": [{
                    "name": {"family": "Doe", "given": ["Jane"]},
                    "gender": "female"
                }]
            }),
        )
        .unwrap();
        assert_eq!(output["contact"], json!([{"name": {"family": "Doe"}}]));

        let calls = evaluator.calls.lock().unwrap();
        assert!(!calls.is_empty());
        let mut seen = HashSet::new();
        for call in calls.iter() {
            assert!(seen.insert(call.clone()), "{call:?} evaluated twice");
        }
    }

    #[test]
    fn test_security_labels_on_outermost_record() {
        let matcher = matcher(json!({
            "rules": [
                {"path": "Patient.name", "method": "redact"},
                {"path": "Patient.telecom", "method": "redact"}
            ]
        }));
        let (output, _) = anonymize(
            &matcher,
            json!({
                "resourceType": "Patient",
                "id": "p1",
                "name": [{"family": "Doe"}],
                "telecom": [{"value": "555"}]
            }),
        )
        .unwrap();
        let keys: Vec<&str> = output.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["resourceType", "id", "meta"]);
        assert_eq!(
            output["meta"]["security"],
            json!([{
                "system": SECURITY_LABEL_SYSTEM,
                "code": "REDACTED",
                "display": "redacted"
            }])
        );
    }

    #[test]
    fn test_existing_labels_not_duplicated() {
        let matcher = matcher(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}));
        let (output, _) = anonymize(
            &matcher,
            json!({
                "resourceType": "Patient",
                "meta": {"security": [{"system": SECURITY_LABEL_SYSTEM, "code": "REDACTED"}]},
                "name": [{"family": "Doe"}]
            }),
        )
        .unwrap();
        assert_eq!(output["meta"]["security"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_contained_records_labelled_separately() {
        let matcher = matcher(json!({
            "rules": [
                {"path": "Practitioner.name", "method": "redact"},
                {"path": "Patient.gender", "method": "substitute", "replaceWith": "unknown"}
            ]
        }));
        let (output, result) = anonymize(
            &matcher,
            json!({
                "resourceType": "Patient",
                "gender": "male",
                "contained": [{"resourceType": "Practitioner", "name": [{"family": "Who"}]}]
            }),
        )
        .unwrap();
        let contained_codes: Vec<&str> = output["contained"][0]["meta"]["security"]
            .as_array()
            .unwrap()
            .iter()
            .map(|label| label["code"].as_str().unwrap())
            .collect();
        assert_eq!(contained_codes, vec!["REDACTED"]);

        let outer_codes: Vec<&str> = output["meta"]["security"]
            .as_array()
            .unwrap()
            .iter()
            .map(|label| label["code"].as_str().unwrap())
            .collect();
        assert_eq!(outer_codes, vec!["REDACTED", "SUBSTITUTED"]);
        assert!(result.is_substituted());
    }

    #[test]
    fn test_labels_can_be_disabled() {
        let matcher = matcher(json!({
            "rules": [{"path": "Patient.name", "method": "redact"}],
            "parameters": {"addSecurityLabels": false}
        }));
        let (output, _) = anonymize(
            &matcher,
            json!({"resourceType": "Patient", "name": [{"family": "Doe"}]}),
        )
        .unwrap();
        assert!(output.get("meta").is_none());
    }

    #[test]
    fn test_ignore_invalid_clears_value() {
        let matcher = matcher(json!({
            "rules": [{"path": "Patient.birthDate", "method": "dateShift"}],
            "processingError": "ignoreInvalid"
        }));
        let (output, result) = anonymize(
            &matcher,
            json!({"resourceType": "Patient", "birthDate": "not a date"}),
        )
        .unwrap();
        assert!(output.get("birthDate").is_none());
        assert!(result.is_redacted());
    }

    #[test]
    fn test_raise_propagates_invalid_input() {
        let matcher = matcher(json!({
            "rules": [{"path": "Patient.birthDate", "method": "dateShift"}]
        }));
        let err = anonymize(
            &matcher,
            json!({"resourceType": "Patient", "birthDate": "not a date"}),
        )
        .unwrap_err();
        assert!(err.is_invalid_input());
    }

    #[test]
    fn test_stack_mismatch_aborts() {
        let matcher = matcher(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}));
        let mut doc = document_from_json(&json!({"resourceType": "Patient", "id": "p1"}));
        let ctx = ProcessContext::new(matcher.configuration().parameters.clone(), "test.json");
        let mut visitor = AnonymizationVisitor::new(&matcher, ctx);
        let root = doc.root();
        let id = doc.child_by_name(root, "id").unwrap();

        visitor.visit(&mut doc, root).unwrap();
        assert_eq!(visitor.state(), VisitorState::Traversing);
        let err = visitor.ctx.pop_record(id).unwrap_err();
        assert!(matches!(err, VeilError::Processing(_)));
    }

    #[test]
    fn test_unfinished_traversal_is_an_error() {
        let matcher = matcher(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}));
        let mut doc = document_from_json(&json!({"resourceType": "Patient"}));
        let ctx = ProcessContext::new(matcher.configuration().parameters.clone(), "test.json");
        let mut visitor = AnonymizationVisitor::new(&matcher, ctx);
        let root = doc.root();
        visitor.visit(&mut doc, root).unwrap();
        assert!(matches!(visitor.finish(), Err(VeilError::Processing(_))));
    }
}
