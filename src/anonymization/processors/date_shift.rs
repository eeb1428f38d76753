//! Consistent date shifting
//!
//! Every date of one entity moves by the same number of days, so intervals
//! between events of that entity survive anonymization. The offset lies in
//! `[-dateShiftRange, +dateShiftRange]` and is derived from
//! HMAC-SHA256(`dateShiftKey`, prefix + entity).
//!
//! Values are parsed with the rule's `dateFormat` first, then as ISO 8601 /
//! RFC 3339, then with the global `dateFormat` / `dateTimeFormat`, and last as a
//! bare year. The output keeps the shape of the input. Year and year-month
//! values are generalized to the year, as are shifted dates whose implied age
//! exceeds `ageOverThreshold`.

use super::crypto_hash::hmac_sha256;
use super::{parse_settings, targets, unsupported, Processor};
use crate::anonymization::context::ProcessContext;
use crate::anonymization::result::{Operation, ProcessResult};
use crate::document::{Document, NodeId};
use crate::domain::{Result, VeilError};
use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat,
};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Map, Value};

/// Method name
pub const NAME: &str = "dateShift";

/// Node types the processor accepts
pub const SUPPORTED_TYPES: [&str; 3] = ["date", "dateTime", "instant"];

const ISO_NAIVE_DATE_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"];

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct DateShiftSettings {
    date_format: Option<String>,
}

/// A parsed temporal value together with how to write it back
#[derive(Debug, Clone, PartialEq)]
enum ParsedDate {
    Year(i32),
    YearMonth(i32),
    Date(NaiveDate, String),
    DateTime(NaiveDateTime, String),
    Rfc3339(DateTime<FixedOffset>, bool),
    Zoned(DateTime<FixedOffset>, String),
}

impl ParsedDate {
    fn date(&self) -> Option<NaiveDate> {
        match self {
            ParsedDate::Year(_) | ParsedDate::YearMonth(_) => None,
            ParsedDate::Date(date, _) => Some(*date),
            ParsedDate::DateTime(value, _) => Some(value.date()),
            ParsedDate::Rfc3339(value, _) | ParsedDate::Zoned(value, _) => Some(value.date_naive()),
        }
    }

    fn year(&self) -> i32 {
        match self {
            ParsedDate::Year(year) | ParsedDate::YearMonth(year) => *year,
            other => other.date().map(|date| date.year()).unwrap_or_default(),
        }
    }

    fn shift(&self, offset: Duration) -> Option<String> {
        match self {
            ParsedDate::Year(_) | ParsedDate::YearMonth(_) => None,
            ParsedDate::Date(date, format) => {
                Some(date.checked_add_signed(offset)?.format(format).to_string())
            }
            ParsedDate::DateTime(value, format) => {
                Some(value.checked_add_signed(offset)?.format(format).to_string())
            }
            ParsedDate::Rfc3339(value, use_z) => Some(
                value
                    .checked_add_signed(offset)?
                    .to_rfc3339_opts(SecondsFormat::AutoSi, *use_z),
            ),
            ParsedDate::Zoned(value, format) => {
                Some(value.checked_add_signed(offset)?.format(format).to_string())
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct DateShiftProcessor {
    date_format: Option<String>,
}

impl DateShiftProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor that tries `format` before the standard parse chain
    pub fn with_format(format: impl Into<String>) -> Self {
        Self {
            date_format: Some(format.into()),
        }
    }

    pub fn from_settings(settings: &Map<String, Value>) -> Result<Self> {
        let settings: DateShiftSettings = parse_settings(NAME, settings)?;
        if let Some(format) = &settings.date_format {
            if format.trim().is_empty() {
                return Err(VeilError::Configuration(
                    "dateShift dateFormat must not be empty".to_string(),
                ));
            }
        }
        Ok(Self {
            date_format: settings.date_format,
        })
    }

    fn parse(&self, text: &str, ctx: &ProcessContext) -> Result<ParsedDate> {
        let text = text.trim();
        let params = ctx.parameters();

        if let Some(format) = &self.date_format {
            if let Some(parsed) = parse_with_format(text, format) {
                return Ok(parsed);
            }
        }
        if let Some(parsed) = parse_iso(text) {
            return Ok(parsed);
        }
        for format in [&params.date_format, &params.date_time_format]
            .into_iter()
            .flatten()
        {
            if let Some(parsed) = parse_with_format(text, format) {
                return Ok(parsed);
            }
        }
        if let Ok(year) = text.parse::<i32>() {
            if (1..=9999).contains(&year) {
                return Ok(ParsedDate::Year(year));
            }
        }

        Err(VeilError::InvalidInput(format!(
            "'{text}' is not a recognizable date"
        )))
    }

    fn shift_value(
        &self,
        text: &str,
        entity: &str,
        ctx: &ProcessContext,
    ) -> Result<(String, Operation)> {
        let params = ctx.parameters();
        let parsed = self.parse(text, ctx)?;

        let days = shift_days(
            params.date_shift_key.expose_secret().as_bytes(),
            entity,
            params.date_shift_range,
        );
        apply_shift(&parsed, text, days, ctx)
    }
}

/// Move `parsed` by `days`, generalizing to the year past the age threshold
///
/// # Errors
///
/// Returns [`VeilError::InvalidInput`] if the shifted value falls outside
/// the representable calendar.
fn apply_shift(
    parsed: &ParsedDate,
    text: &str,
    days: i64,
    ctx: &ProcessContext,
) -> Result<(String, Operation)> {
    let Some(date) = parsed.date() else {
        return Ok((format!("{:04}", parsed.year()), Operation::Abstract));
    };

    let out_of_range =
        || VeilError::InvalidInput(format!("'{text}' shifted by {days} days is out of range"));
    let offset = Duration::try_days(days).ok_or_else(out_of_range)?;
    let shifted_date = date.checked_add_signed(offset).ok_or_else(out_of_range)?;

    let params = ctx.parameters();
    if age_at(shifted_date, params.reference_date()) > params.age_over_threshold as i64 {
        return Ok((format!("{:04}", shifted_date.year()), Operation::Abstract));
    }

    let shifted = parsed.shift(offset).ok_or_else(out_of_range)?;
    Ok((shifted, Operation::DateShift))
}

impl Processor for DateShiftProcessor {
    fn name(&self) -> &str {
        NAME
    }

    fn process(
        &self,
        doc: &mut Document,
        node: NodeId,
        ctx: &ProcessContext,
    ) -> Result<ProcessResult> {
        let targets = targets(doc, node, ctx);
        let mut result = ProcessResult::new();

        for target in targets.nodes {
            let supported = SUPPORTED_TYPES.contains(&doc.node(target).type_name());
            let text = match doc.node(target).value_str() {
                Some(text) if supported => text.to_string(),
                _ if targets.explicit => return Err(unsupported(NAME, doc, target)),
                _ => continue,
            };

            let entity = ctx.date_shift_entity(doc, target);
            let (shifted, operation) = self.shift_value(&text, &entity, ctx)?;
            doc.set_value(target, Some(Value::String(shifted)));
            result.add(operation, target);
        }

        Ok(result)
    }
}

/// Day offset for an entity, in `[-range, +range]`
pub fn shift_days(key: &[u8], entity: &str, range: i64) -> i64 {
    if range <= 0 {
        return 0;
    }
    let digest = hmac_sha256(key, entity.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let hash = i128::from(u64::from_be_bytes(head));

    // Widened so 2 * range + 1 cannot overflow; the result lies in [-range, range]
    let span = 2 * i128::from(range) + 1;
    (hash % span - i128::from(range)) as i64
}

/// Completed years between `date` and `reference`
fn age_at(date: NaiveDate, reference: NaiveDate) -> i64 {
    let mut age = (reference.year() - date.year()) as i64;
    if (reference.month(), reference.day()) < (date.month(), date.day()) {
        age -= 1;
    }
    age
}

fn parse_iso(text: &str) -> Option<ParsedDate> {
    let bytes = text.as_bytes();
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);

    if bytes.len() == 4 && digits(0..4) {
        return text.parse().ok().map(ParsedDate::Year);
    }
    if bytes.len() == 7 && digits(0..4) && bytes[4] == b'-' && digits(5..7) {
        let month: u32 = text[5..7].parse().ok()?;
        if (1..=12).contains(&month) {
            return text[..4].parse().ok().map(ParsedDate::YearMonth);
        }
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Some(ParsedDate::Date(date, "%Y-%m-%d".to_string()));
    }
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(ParsedDate::Rfc3339(value, text.ends_with('Z')));
    }
    for format in ISO_NAIVE_DATE_TIME_FORMATS {
        if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
            return Some(ParsedDate::DateTime(value, format.to_string()));
        }
    }
    None
}

fn parse_with_format(text: &str, format: &str) -> Option<ParsedDate> {
    if let Ok(value) = DateTime::parse_from_str(text, format) {
        return Some(ParsedDate::Zoned(value, format.to_string()));
    }
    if let Ok(value) = NaiveDateTime::parse_from_str(text, format) {
        return Some(ParsedDate::DateTime(value, format.to_string()));
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        return Some(ParsedDate::Date(date, format.to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn params() -> Value {
        json!({
            "dateShiftKey": "shift-key",
            "dateShiftRange": 50,
            "ageReferenceDate": "2024-01-01"
        })
    }

    fn shift(value: &str) -> (String, ProcessResult) {
        let mut doc = doc(json!({"resourceType": "Patient", "id": "p1", "birthDate": value}));
        let node = find(&doc, "birthDate");
        let result = DateShiftProcessor::new()
            .process(&mut doc, node, &ctx_with(params()))
            .unwrap();
        (doc.node(node).value_str().unwrap().to_string(), result)
    }

    #[test]
    fn test_shift_is_deterministic() {
        let (first, result) = shift("1990-05-17");
        let (second, _) = shift("1990-05-17");
        assert_eq!(first, second);
        assert!(result.is_date_shifted());

        let days = shift_days(b"shift-key", "p1", 50);
        let expected = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap() + Duration::days(days);
        assert_eq!(first, expected.format("%Y-%m-%d").to_string());
    }

    #[test]
    fn test_shift_days_within_range() {
        for entity in ["a", "b", "patient-1", "patient-2", ""] {
            let days = shift_days(b"key", entity, 7);
            assert!((-7..=7).contains(&days));
        }
        assert_eq!(shift_days(b"key", "a", 0), 0);
    }

    #[test]
    fn test_shift_days_with_extreme_range() {
        for entity in ["a", "b", "patient-1"] {
            let days = shift_days(b"key", entity, i64::MAX);
            assert!(days >= -i64::MAX);
        }
    }

    #[test_case(200_000_000_000_000 ; "offset beyond duration limits")]
    #[test_case(200_000_000 ; "offset beyond calendar")]
    #[test_case(-200_000_000 ; "negative offset beyond calendar")]
    fn test_overflowing_shift_is_invalid_input(days: i64) {
        let parsed = parse_iso("1990-05-17").unwrap();
        let err = apply_shift(&parsed, "1990-05-17", days, &ctx_with(params())).unwrap_err();
        assert!(matches!(err, VeilError::InvalidInput(_)), "{err}");
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_age_threshold_uses_shifted_date() {
        let ctx = ctx_with(params());

        // 89 on the reference date as written, 90 once moved back a day
        let parsed = parse_iso("1934-01-02").unwrap();
        let (value, operation) = apply_shift(&parsed, "1934-01-02", 0, &ctx).unwrap();
        assert_eq!(value, "1934-01-02");
        assert_eq!(operation, Operation::DateShift);

        let (value, operation) = apply_shift(&parsed, "1934-01-02", -1, &ctx).unwrap();
        assert_eq!(value, "1934");
        assert_eq!(operation, Operation::Abstract);
    }

    #[test]
    fn test_same_entity_same_offset() {
        let mut doc = doc(json!({
            "resourceType": "Encounter",
            "id": "e1",
            "period": {"start": "2020-01-01", "end": "2020-01-11"}
        }));
        let period = find(&doc, "period");
        DateShiftProcessor::new()
            .process(&mut doc, period, &ctx_with(params()))
            .unwrap();
        let start = NaiveDate::parse_from_str(doc.node(find(&doc, "start")).value_str().unwrap(), "%Y-%m-%d").unwrap();
        let end = NaiveDate::parse_from_str(doc.node(find(&doc, "end")).value_str().unwrap(), "%Y-%m-%d").unwrap();
        assert_eq!((end - start).num_days(), 10);
    }

    #[test]
    fn test_date_time_keeps_offset_shape() {
        let (shifted, _) = shift("2015-02-07T13:28:17-05:00");
        assert!(shifted.ends_with("T13:28:17-05:00"));
        let (shifted, _) = shift("2015-02-07T13:28:17Z");
        assert!(shifted.ends_with("T13:28:17Z"));
    }

    #[test_case("1990" ; "year only")]
    #[test_case("1990-05" ; "year month")]
    fn test_partial_dates_become_year(input: &str) {
        let (value, result) = shift(input);
        assert_eq!(value, "1990");
        assert!(result.is_abstracted());
    }

    #[test]
    fn test_age_over_threshold_keeps_year_only() {
        let (value, result) = shift("1920-03-04");
        assert_eq!(value, "1920");
        assert!(result.is_abstracted());
        assert!(!result.is_date_shifted());
    }

    #[test]
    fn test_rule_format_is_tried_first() {
        let mut doc = doc(json!({"resourceType": "Patient", "id": "p1", "note": "05/17/1990"}));
        let node = find(&doc, "note");
        doc.set_type_name(node, "date");
        let processor = DateShiftProcessor::with_format("%m/%d/%Y");
        processor.process(&mut doc, node, &ctx_with(params())).unwrap();
        let shifted = doc.node(node).value_str().unwrap();
        assert!(NaiveDate::parse_from_str(shifted, "%m/%d/%Y").is_ok());
    }

    #[test]
    fn test_global_format_fallback() {
        let mut doc = doc(json!({"resourceType": "Patient", "id": "p1", "note": "17.05.1990"}));
        let node = find(&doc, "note");
        doc.set_type_name(node, "date");
        let mut parameters = params();
        parameters["dateFormat"] = json!("%d.%m.%Y");
        DateShiftProcessor::new()
            .process(&mut doc, node, &ctx_with(parameters))
            .unwrap();
        assert!(NaiveDate::parse_from_str(doc.node(node).value_str().unwrap(), "%d.%m.%Y").is_ok());
    }

    #[test]
    fn test_unparseable_is_invalid_input() {
        let mut doc = doc(json!({"resourceType": "Patient", "id": "p1", "note": "yesterday"}));
        let node = find(&doc, "note");
        doc.set_type_name(node, "date");
        let err = DateShiftProcessor::new()
            .process(&mut doc, node, &ctx_with(params()))
            .unwrap_err();
        assert!(matches!(err, VeilError::InvalidInput(_)));
    }

    #[test]
    fn test_unsupported_type() {
        let mut doc = doc(json!({"resourceType": "Patient", "gender": "male"}));
        let node = find(&doc, "gender");
        let err = DateShiftProcessor::new()
            .process(&mut doc, node, &ctx())
            .unwrap_err();
        assert!(matches!(err, VeilError::UnsupportedNodeType { .. }));
    }

    #[test]
    fn test_unknown_setting_rejected() {
        assert!(DateShiftProcessor::from_settings(&settings(json!({"dateFormat": "%Y"}))).is_ok());
        assert!(DateShiftProcessor::from_settings(&settings(json!({"range": 3}))).is_err());
    }
}
