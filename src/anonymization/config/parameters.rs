//! Global anonymization parameters
//!
//! The `parameters` object of a rule file. Every key is optional; unset keys
//! take a default so processors never have to null-check. Unset keys are
//! generated once per process, which keeps repeated validation of the same
//! rule file deterministic within a run while never shipping a fixed key.

use crate::config::{secret_string, SecretString};
use crate::domain::{Result, VeilError};
use chrono::NaiveDate;
use rand::distributions::Alphanumeric;
use rand::Rng;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

/// Default date-shift range in days
pub const DEFAULT_DATE_SHIFT_RANGE: i64 = 50;

/// Largest accepted `dateShiftRange`, in days (about a century)
pub const MAX_DATE_SHIFT_RANGE: i64 = 36_500;

/// Default age above which dates are generalized to the year
pub const DEFAULT_AGE_OVER_THRESHOLD: u32 = 89;

/// Maximum number of fractional digits for perturbation rounding
pub const MAX_ROUND_TO: i64 = 28;

/// Which entity the date-shift offset is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateShiftScope {
    /// The identifier of the enclosing record
    #[default]
    Resource,
    /// The locator of the item being processed
    File,
    /// One offset for the whole job
    Folder,
}

/// How the perturbation span is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeType {
    /// Noise magnitude is the span itself
    #[default]
    Fixed,
    /// Noise magnitude is `span * |value|`
    Proportional,
}

/// Raw `parameters` object as written in a rule file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawParameters {
    date_shift_key: Option<String>,
    date_shift_key_prefix: Option<String>,
    date_shift_scope: Option<DateShiftScope>,
    date_shift_range: Option<i64>,
    crypto_hash_key: Option<String>,
    encrypt_key: Option<String>,
    perturb_span: Option<f64>,
    perturb_round_to: Option<i64>,
    perturb_range_type: Option<RangeType>,
    age_over_threshold: Option<u32>,
    date_format: Option<String>,
    date_time_format: Option<String>,
    age_reference_date: Option<String>,
    enable_partial_dates_for_redact: Option<bool>,
    enable_partial_ages_for_redact: Option<bool>,
    enable_partial_zip_codes_for_redact: Option<bool>,
    restricted_zip_code_tabulation_areas: Option<Vec<String>>,
    add_security_labels: Option<bool>,
}

/// Validated global parameters shared by every processor
#[derive(Debug, Clone)]
pub struct GlobalParameters {
    pub date_shift_key: SecretString,
    pub date_shift_key_prefix: String,
    pub date_shift_scope: DateShiftScope,
    pub date_shift_range: i64,
    pub crypto_hash_key: SecretString,
    pub encrypt_key: SecretString,
    pub perturb_span: f64,
    pub perturb_round_to: u32,
    pub perturb_range_type: RangeType,
    pub age_over_threshold: u32,
    pub date_format: Option<String>,
    pub date_time_format: Option<String>,
    pub age_reference_date: Option<NaiveDate>,
    pub enable_partial_dates_for_redact: bool,
    pub enable_partial_ages_for_redact: bool,
    pub enable_partial_zip_codes_for_redact: bool,
    pub restricted_zip_code_tabulation_areas: Vec<String>,
    pub add_security_labels: bool,
}

impl Default for GlobalParameters {
    fn default() -> Self {
        Self {
            date_shift_key: secret_string(process_key(KeyKind::DateShift)),
            date_shift_key_prefix: String::new(),
            date_shift_scope: DateShiftScope::default(),
            date_shift_range: DEFAULT_DATE_SHIFT_RANGE,
            crypto_hash_key: secret_string(process_key(KeyKind::CryptoHash)),
            encrypt_key: secret_string(process_key(KeyKind::Encrypt)),
            perturb_span: 1.0,
            perturb_round_to: 2,
            perturb_range_type: RangeType::default(),
            age_over_threshold: DEFAULT_AGE_OVER_THRESHOLD,
            date_format: None,
            date_time_format: None,
            age_reference_date: None,
            enable_partial_dates_for_redact: false,
            enable_partial_ages_for_redact: false,
            enable_partial_zip_codes_for_redact: false,
            restricted_zip_code_tabulation_areas: Vec::new(),
            add_security_labels: true,
        }
    }
}

impl PartialEq for GlobalParameters {
    fn eq(&self, other: &Self) -> bool {
        self.date_shift_key.expose_secret().as_bytes()
            == other.date_shift_key.expose_secret().as_bytes()
            && self.crypto_hash_key.expose_secret().as_bytes()
                == other.crypto_hash_key.expose_secret().as_bytes()
            && self.encrypt_key.expose_secret().as_bytes()
                == other.encrypt_key.expose_secret().as_bytes()
            && self.date_shift_key_prefix == other.date_shift_key_prefix
            && self.date_shift_scope == other.date_shift_scope
            && self.date_shift_range == other.date_shift_range
            && self.perturb_span == other.perturb_span
            && self.perturb_round_to == other.perturb_round_to
            && self.perturb_range_type == other.perturb_range_type
            && self.age_over_threshold == other.age_over_threshold
            && self.date_format == other.date_format
            && self.date_time_format == other.date_time_format
            && self.age_reference_date == other.age_reference_date
            && self.enable_partial_dates_for_redact == other.enable_partial_dates_for_redact
            && self.enable_partial_ages_for_redact == other.enable_partial_ages_for_redact
            && self.enable_partial_zip_codes_for_redact
                == other.enable_partial_zip_codes_for_redact
            && self.restricted_zip_code_tabulation_areas
                == other.restricted_zip_code_tabulation_areas
            && self.add_security_labels == other.add_security_labels
    }
}

impl GlobalParameters {
    /// Parse and validate a `parameters` object; `None` yields the defaults
    pub fn from_value(value: Option<&Value>) -> Result<Self> {
        let raw: RawParameters = match value {
            None | Some(Value::Null) => RawParameters::default(),
            Some(value) => RawParameters::deserialize(value).map_err(|e| {
                VeilError::Configuration(format!("Invalid parameters: {e}"))
            })?,
        };

        let defaults = Self::default();

        let date_shift_range = raw.date_shift_range.unwrap_or(DEFAULT_DATE_SHIFT_RANGE);
        if !(0..=MAX_DATE_SHIFT_RANGE).contains(&date_shift_range) {
            return Err(VeilError::Configuration(format!(
                "dateShiftRange must be between 0 and {MAX_DATE_SHIFT_RANGE} days, got {date_shift_range}"
            )));
        }

        let encrypt_key = match raw.encrypt_key {
            Some(key) => {
                validate_encrypt_key(key.as_bytes())?;
                secret_string(key)
            }
            None => defaults.encrypt_key.clone(),
        };

        let perturb_span = raw.perturb_span.unwrap_or(defaults.perturb_span);
        let perturb_round_to = validate_perturb_bounds(
            perturb_span,
            raw.perturb_round_to.unwrap_or(defaults.perturb_round_to as i64),
        )?;

        let date_format = non_empty_format("dateFormat", raw.date_format)?;
        let date_time_format = non_empty_format("dateTimeFormat", raw.date_time_format)?;

        let age_reference_date = raw
            .age_reference_date
            .map(|text| {
                NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|_| {
                    VeilError::Configuration(format!(
                        "ageReferenceDate must be YYYY-MM-DD, got '{text}'"
                    ))
                })
            })
            .transpose()?;

        let restricted = raw.restricted_zip_code_tabulation_areas.unwrap_or_default();
        if let Some(bad) = restricted
            .iter()
            .find(|zip| zip.len() != 3 || !zip.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(VeilError::Configuration(format!(
                "restrictedZipCodeTabulationAreas entries must be 3 digits, got '{bad}'"
            )));
        }

        Ok(Self {
            date_shift_key: raw
                .date_shift_key
                .map(secret_string)
                .unwrap_or(defaults.date_shift_key),
            date_shift_key_prefix: raw.date_shift_key_prefix.unwrap_or_default(),
            date_shift_scope: raw.date_shift_scope.unwrap_or_default(),
            date_shift_range,
            crypto_hash_key: raw
                .crypto_hash_key
                .map(secret_string)
                .unwrap_or(defaults.crypto_hash_key),
            encrypt_key,
            perturb_span,
            perturb_round_to,
            perturb_range_type: raw.perturb_range_type.unwrap_or_default(),
            age_over_threshold: raw
                .age_over_threshold
                .unwrap_or(DEFAULT_AGE_OVER_THRESHOLD),
            date_format,
            date_time_format,
            age_reference_date,
            enable_partial_dates_for_redact: raw.enable_partial_dates_for_redact.unwrap_or(false),
            enable_partial_ages_for_redact: raw.enable_partial_ages_for_redact.unwrap_or(false),
            enable_partial_zip_codes_for_redact: raw
                .enable_partial_zip_codes_for_redact
                .unwrap_or(false),
            restricted_zip_code_tabulation_areas: restricted,
            add_security_labels: raw.add_security_labels.unwrap_or(true),
        })
    }

    /// Date ages are computed against
    pub fn reference_date(&self) -> NaiveDate {
        self.age_reference_date
            .unwrap_or_else(|| chrono::Utc::now().date_naive())
    }
}

/// Check that an encryption key is 128, 192 or 256 bits long
pub fn validate_encrypt_key(key: &[u8]) -> Result<()> {
    match key.len() * 8 {
        128 | 192 | 256 => Ok(()),
        bits => Err(VeilError::Configuration(format!(
            "encryptKey must be 128, 192 or 256 bits, got {bits} bits"
        ))),
    }
}

/// Check perturbation bounds, returning the validated rounding digits
pub fn validate_perturb_bounds(span: f64, round_to: i64) -> Result<u32> {
    if !span.is_finite() || span < 0.0 {
        return Err(VeilError::Configuration(format!(
            "perturb span must be >= 0, got {span}"
        )));
    }
    if !(0..=MAX_ROUND_TO).contains(&round_to) {
        return Err(VeilError::Configuration(format!(
            "perturb roundTo must be between 0 and {MAX_ROUND_TO}, got {round_to}"
        )));
    }
    Ok(round_to as u32)
}

fn non_empty_format(name: &str, format: Option<String>) -> Result<Option<String>> {
    match format {
        Some(f) if f.trim().is_empty() => Err(VeilError::Configuration(format!(
            "{name} must not be empty"
        ))),
        other => Ok(other),
    }
}

#[derive(Clone, Copy)]
enum KeyKind {
    DateShift,
    CryptoHash,
    Encrypt,
}

/// Random key generated on first use and reused for the rest of the process
fn process_key(kind: KeyKind) -> String {
    static DATE_SHIFT: OnceLock<String> = OnceLock::new();
    static CRYPTO_HASH: OnceLock<String> = OnceLock::new();
    static ENCRYPT: OnceLock<String> = OnceLock::new();

    let cell = match kind {
        KeyKind::DateShift => &DATE_SHIFT,
        KeyKind::CryptoHash => &CRYPTO_HASH,
        KeyKind::Encrypt => &ENCRYPT,
    };
    cell.get_or_init(|| {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect()
    })
    .clone()
}
