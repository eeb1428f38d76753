//! Redaction
//!
//! Removes values from the output. Three partial modes, enabled through the
//! global parameters, keep a coarse part of the value instead:
//!
//! - dates keep their year unless the implied age is above `ageOverThreshold`
//! - `Age` quantities at or under the threshold are kept as they are
//! - postal codes keep their first three digits, or `000` when the prefix is a
//!   restricted tabulation area

use super::{parse_settings, targets, NoSettings, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::Result;
use chrono::Datelike;
use serde_json::{Map, Value};

/// Method name
pub const NAME: &str = "redact";

const DATE_TYPES: [&str; 3] = ["date", "dateTime", "instant"];

#[derive(Debug, Default, Clone)]
pub struct RedactProcessor;

impl RedactProcessor {
    pub fn new() -> Self {
        Self
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        parse_settings::<NoSettings>(NAME, settings)?;
        Ok(Self)
    }

    /// Remove every value under `node` without partial redaction
    ///
    /// Used when an invalid value is ignored rather than failing the item.
    pub fn clear(doc: &mut Document, node: NodeId, ctx: &ProcessContext) -> ProcessResult {
        let mut result = ProcessResult::new();
        for target in targets(doc, node, ctx).nodes {
            doc.set_value(target, None);
            result.add(Operation::Redact, target);
        }
        result
    }

    fn redact_primitive(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
        result: &mut ProcessResult,
    ) {
        let params = ctx.parameters();

        if params.enable_partial_ages_for_redact && is_kept_age(doc, node, params.age_over_threshold)
        {
            return;
        }

        if params.enable_partial_dates_for_redact
            && DATE_TYPES.contains(&doc.node(node).type_name())
        {
            if let Some(year) = leading_year(doc.node(node).value_str()) {
                let age = ctx.parameters().reference_date().year() - year;
                if age <= params.age_over_threshold as i32 {
                    doc.set_value(node, Some(Value::String(format!("{year:04}"))));
                    doc.set_type_name(node, "date");
                    result.add(Operation::Abstract, node);
                    return;
                }
            }
        }

        if params.enable_partial_zip_codes_for_redact && doc.node(node).name() == "postalCode" {
            if let Some(prefix) = zip_prefix(doc.node(node).value_str()) {
                let kept = if params
                    .restricted_zip_code_tabulation_areas
                    .iter()
                    .any(|restricted| restricted == &prefix)
                {
                    "000".to_string()
                } else {
                    prefix
                };
                doc.set_value(node, Some(Value::String(kept)));
                result.add(Operation::Abstract, node);
                return;
            }
        }

        doc.set_value(node, None);
        result.add(Operation::Redact, node);
    }
}

impl Processor for RedactProcessor {
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
        for target in targets(doc, node, ctx).nodes {
            self.redact_primitive(doc, target, ctx, &mut result);
        }
        Ok(result)
    }
}

/// Whether `node` belongs to an `Age` whose value is at or under the threshold
fn is_kept_age(doc: &Document, node: NodeId, threshold: u32) -> bool {
    let Some(parent) = doc.node(node).parent() else {
        return false;
    };
    if doc.node(parent).type_name() != "Age" {
        return false;
    }
    doc.child_by_name(parent, "value")
        .and_then(|value| doc.node(value).value())
        .and_then(Value::as_f64)
        .map(|age| age <= threshold as f64)
        .unwrap_or(false)
}

fn leading_year(text: Option<&str>) -> Option<i32> {
    let text = text?;
    let year = text.get(..4)?;
    if year.chars().all(|c| c.is_ascii_digit()) {
        year.parse().ok()
    } else {
        None
    }
}

fn zip_prefix(text: Option<&str>) -> Option<String> {
    let digits: String = text?.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() >= 3 {
        Some(digits[..3].to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::document::json::document_to_json;
    use serde_json::json;

    #[test]
    fn test_redact_primitive() {
        let mut doc = doc(json!({"resourceType": "Patient", "id": "p1", "gender": "male"}));
        let gender = find(&doc, "gender");
        let result = RedactProcessor::new()
            .process(&mut doc, gender, &ctx())
            .unwrap();
        assert!(result.is_redacted());
        assert_eq!(
            document_to_json(&doc),
            json!({"resourceType": "Patient", "id": "p1"})
        );
    }

    #[test]
    fn test_redact_composite_clears_descendants() {
        let mut doc = doc(json!({
            "resourceType": "Patient",
            "name": [{"family": "Doe", "given": ["John", "Q"]}]
        }));
        let name = find(&doc, "name");
        let result = RedactProcessor::new().process(&mut doc, name, &ctx()).unwrap();
        assert_eq!(result.nodes(&Operation::Redact).map(|n| n.len()), Some(3));
        assert_eq!(document_to_json(&doc), json!({"resourceType": "Patient"}));
    }

    #[test]
    fn test_partial_date_keeps_year() {
        let mut doc = doc(json!({"resourceType": "Patient", "birthDate": "1980-06-15"}));
        let ctx = ctx_with(json!({
            "enablePartialDatesForRedact": true,
            "ageReferenceDate": "2024-01-01"
        }));
        let birth = find(&doc, "birthDate");
        let result = RedactProcessor::new().process(&mut doc, birth, &ctx).unwrap();
        assert!(result.is_abstracted());
        assert_eq!(doc.node(birth).value_str(), Some("1980"));
    }

    #[test]
    fn test_partial_date_over_threshold_is_removed() {
        let mut doc = doc(json!({"resourceType": "Patient", "birthDate": "1920-06-15"}));
        let ctx = ctx_with(json!({
            "enablePartialDatesForRedact": true,
            "ageReferenceDate": "2024-01-01"
        }));
        let birth = find(&doc, "birthDate");
        let result = RedactProcessor::new().process(&mut doc, birth, &ctx).unwrap();
        assert!(result.is_redacted());
        assert_eq!(doc.node(birth).value(), None);
    }

    #[test]
    fn test_partial_age_under_threshold_is_kept() {
        let mut doc = doc(json!({
            "resourceType": "Observation",
            "valueAge": {"value": 42, "unit": "years", "code": "a"}
        }));
        let ctx = ctx_with(json!({"enablePartialAgesForRedact": true}));
        let age = find(&doc, "valueAge");
        let result = RedactProcessor::new().process(&mut doc, age, &ctx).unwrap();
        assert!(result.is_empty());
        assert_eq!(
            document_to_json(&doc)["valueAge"]["value"],
            json!(42)
        );
    }

    #[test]
    fn test_partial_zip_codes() {
        let mut doc = doc(json!({
            "resourceType": "Patient",
            "address": [{"postalCode": "12345"}, {"postalCode": "03601"}]
        }));
        let ctx = ctx_with(json!({
            "enablePartialZipCodesForRedact": true,
            "restrictedZipCodeTabulationAreas": ["036"]
        }));
        let address = find(&doc, "address");
        let array = doc.node(address).parent().unwrap();
        RedactProcessor::new().process(&mut doc, array, &ctx).unwrap();
        assert_eq!(
            document_to_json(&doc)["address"],
            json!([{"postalCode": "123"}, {"postalCode": "000"}])
        );
    }

    #[test]
    fn test_settings_rejected() {
        let err = RedactProcessor::from_settings(&settings(json!({"partial": true}))).unwrap_err();
        assert!(matches!(err, crate::domain::VeilError::Configuration(_)));
    }
}
