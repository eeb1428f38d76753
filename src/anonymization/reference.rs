//! Consistent transformation of cross-references
//!
//! Pseudonymizing a reference such as `Patient/034AB16` must only touch the
//! identifier, otherwise the reference no longer resolves within the
//! anonymized dataset. The shapes below are tried in order; the first one that
//! matches decides which segment is the identifier. A string matching none of
//! them is transformed as a whole.

use regex::Regex;
use std::sync::OnceLock;

fn reference_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Local fragment
            r"^(?P<prefix>#)(?P<id>.+)$",
            // Absolute URL ending in Type/id
            r"^(?P<prefix>[A-Za-z][A-Za-z0-9+.\-]*://\S+/[A-Z][A-Za-z]+/)(?P<id>[A-Za-z0-9\-.]{1,64})(?P<suffix>/_history/[A-Za-z0-9\-.]{1,64})?$",
            // Relative Type/id
            r"^(?P<prefix>[A-Z][A-Za-z]+/)(?P<id>[A-Za-z0-9\-.]{1,64})(?P<suffix>/_history/[A-Za-z0-9\-.]{1,64})?$",
            r"^(?P<prefix>urn:uuid:)(?P<id>.+)$",
            r"^(?P<prefix>urn:oid:)(?P<id>.+)$",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("valid reference pattern"))
        .collect()
    })
}

/// Apply `transform` to the identifier segment of a reference
pub fn transform_reference<F>(reference: &str, transform: F) -> String
where
    F: Fn(&str) -> String,
{
    for pattern in reference_patterns() {
        if let Some(captures) = pattern.captures(reference) {
            let prefix = captures.name("prefix").map(|m| m.as_str()).unwrap_or("");
            let id = captures.name("id").map(|m| m.as_str()).unwrap_or("");
            let suffix = captures.name("suffix").map(|m| m.as_str()).unwrap_or("");
            return format!("{prefix}{}{suffix}", transform(id));
        }
    }
    transform(reference)
}
