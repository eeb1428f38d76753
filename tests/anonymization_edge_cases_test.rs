//! Edge case tests for the anonymization engine

use serde_json::{json, Value};
use veil::anonymization::processors::encrypt::encrypt_value;
use veil::anonymization::{AnonymizerEngine, ProcessorRegistry};

fn engine(rules: Value) -> AnonymizerEngine {
    AnonymizerEngine::from_value(&rules, &ProcessorRegistry::new()).unwrap()
}

#[test]
fn test_empty_object() {
    let engine = engine(json!({"rules": [{"type": "HumanName", "method": "redact"}]}));
    let outcome = engine.anonymize_value(&json!({}), "empty.json").unwrap();

    assert_eq!(outcome.value, json!({}));
    assert!(outcome.result.is_empty());
}

#[test]
fn test_no_matching_rules_leaves_document_unchanged() {
    let engine = engine(json!({"rules": [{"path": "Patient.name", "method": "redact"}]}));
    let observation = json!({
        "resourceType": "Observation",
        "id": "obs-1",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "29463-7"}]}
    });
    let outcome = engine.anonymize_value(&observation, "obs.json").unwrap();

    assert_eq!(outcome.value, observation);
    assert!(outcome.value.get("meta").is_none());
}

#[test]
fn test_field_order_is_preserved() {
    let engine = engine(json!({
        "rules": [{"path": "Patient.gender", "method": "substitute", "replaceWith": "other"}],
        "parameters": {"addSecurityLabels": false}
    }));
    let patient = json!({
        "resourceType": "Patient",
        "zeta": "z",
        "gender": "female",
        "alpha": "a"
    });
    let outcome = engine.anonymize_value(&patient, "p.json").unwrap();

    let keys: Vec<&str> = outcome
        .value
        .as_object()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["resourceType", "zeta", "gender", "alpha"]);
    assert_eq!(outcome.value["gender"], json!("other"));
}

#[test]
fn test_very_long_string_is_encrypted() {
    let key = "0123456789abcdef";
    let engine = engine(json!({
        "rules": [{"path": "Patient.text.div", "method": "encrypt"}],
        "parameters": {"encryptKey": key}
    }));
    let long_text = "α".repeat(5_000);
    let patient = json!({"resourceType": "Patient", "text": {"div": long_text}});
    let outcome = engine.anonymize_value(&patient, "p.json").unwrap();

    let expected = encrypt_value(key.as_bytes(), &long_text).unwrap();
    assert_eq!(outcome.value["text"]["div"], json!(expected));
}

#[test]
fn test_null_replacement_writes_null() {
    let engine = engine(json!({
        "rules": [{"path": "Patient.gender", "method": "substitute", "replaceWith": null}]
    }));
    let outcome = engine
        .anonymize_value(&json!({"resourceType": "Patient", "gender": "male"}), "p.json")
        .unwrap();

    assert!(outcome.value.get("gender").unwrap().is_null());
    assert!(outcome.result.is_substituted());
}

#[test]
fn test_generalize_integer_ranges() {
    let engine = engine(json!({
        "rules": [{
            "path": "Observation.valueInteger",
            "method": "generalize",
            "cases": [
                {"range": [null, 18], "value": "minor"},
                {"range": [18, null], "value": "adult"}
            ]
        }]
    }));
    let outcome = engine
        .anonymize_value(
            &json!({"resourceType": "Observation", "valueInteger": 42}),
            "obs.json",
        )
        .unwrap();

    assert_eq!(outcome.value["valueInteger"], json!("adult"));
    assert!(outcome.result.is_abstracted());
}

#[test]
fn test_perturbed_quantity_stays_within_span() {
    let engine = engine(json!({
        "rules": [{"path": "Observation.valueQuantity", "method": "perturb", "span": 2, "roundTo": 1}]
    }));
    let observation = json!({
        "resourceType": "Observation",
        "valueQuantity": {"value": 72.5, "unit": "kg"}
    });

    for _ in 0..20 {
        let outcome = engine.anonymize_value(&observation, "obs.json").unwrap();
        let value = outcome.value["valueQuantity"]["value"].as_f64().unwrap();
        assert!((70.5..=74.5).contains(&value), "out of range: {value}");
        assert_eq!(outcome.value["valueQuantity"]["unit"], json!("kg"));
    }
}

#[test]
fn test_deeply_nested_contained_records() {
    let engine = engine(json!({"rules": [{"type": "HumanName", "method": "redact"}]}));
    let patient = json!({
        "resourceType": "Patient",
        "contained": [{
            "resourceType": "RelatedPerson",
            "name": [{"family": "Parent"}],
            "contained": [{
                "resourceType": "Practitioner",
                "name": [{"family": "Doctor"}]
            }]
        }]
    });
    let outcome = engine.anonymize_value(&patient, "p.json").unwrap();
    let rendered = outcome.value.to_string();

    assert!(!rendered.contains("Parent"));
    assert!(!rendered.contains("Doctor"));
    assert_eq!(
        outcome.value["contained"][0]["meta"]["security"][0]["code"],
        json!("REDACTED")
    );
}

#[test]
fn test_partial_date_redaction_keeps_year() {
    let engine = engine(json!({
        "rules": [{"path": "Patient.birthDate", "method": "redact"}],
        "parameters": {"enablePartialDatesForRedact": true, "ageReferenceDate": "2024-01-01"}
    }));
    let outcome = engine
        .anonymize_value(
            &json!({"resourceType": "Patient", "birthDate": "1980-06-15"}),
            "p.json",
        )
        .unwrap();

    assert_eq!(outcome.value["birthDate"], json!("1980"));
    assert!(outcome.result.is_abstracted());
}

#[test]
fn test_non_object_json_text() {
    let engine = engine(json!({"rules": [{"type": "HumanName", "method": "redact"}]}));
    let outcome = engine.anonymize_str("[1, 2, 3]", "numbers.json").unwrap();
    assert_eq!(outcome.value, json!([1, 2, 3]));
    assert!(outcome.result.is_empty());
}
