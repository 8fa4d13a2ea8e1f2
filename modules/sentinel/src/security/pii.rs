//! PII detection and redaction
//!
//! Applied to every payload before it leaves the process toward the AI
//! provider, and available for audit-safe logging. Two mechanisms compose:
//!
//! - field-name matching against a closed set of personal-data field names
//!   (the whole value is masked), and
//! - pattern matching inside free-form strings (emails, phone numbers,
//!   national ids, card numbers are substituted with placeholders).

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("email regex")
});

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\+?1[-.\s]?)?\(?[0-9]{3}\)?[-.\s]?[0-9]{3}[-.\s]?[0-9]{4}\b")
        .expect("phone regex")
});

static SSN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-?\d{2}-?\d{4}\b").expect("ssn regex"));

static CREDIT_CARD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").expect("card regex"));

/// Field names that carry personal data regardless of value shape.
///
/// Matching is substring-based on the lowercased key, so `customer_email`
/// and `shipping_address` are caught by `email` / `address`.
const PII_FIELDS: &[&str] = &[
    "email",
    "phone",
    "mobile",
    "telephone",
    "name",
    "address",
    "ssn",
    "social_security",
    "tax_id",
    "credit_card",
    "card_number",
    "cc_number",
    "ip_address",
    "ip_addr",
    "date_of_birth",
    "dob",
    "birth_date",
];

/// Maximum free-text length forwarded to the AI provider; longer strings are
/// truncated because they may smuggle unredacted personal data.
const AI_MAX_TEXT_LEN: usize = 50;

fn is_pii_field(key: &str) -> bool {
    let lowered = key.to_lowercase();
    PII_FIELDS.iter().any(|field| lowered.contains(field))
}

fn mask_value(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) if s.len() > 4 => {
            let first = s.chars().next().unwrap_or('*');
            let last = s.chars().last().unwrap_or('*');
            JsonValue::String(format!("{first}***{last}"))
        }
        JsonValue::String(_) => JsonValue::String("***".to_string()),
        _ => JsonValue::String("[REDACTED]".to_string()),
    }
}

fn redact_string(s: &str) -> String {
    let mut out = EMAIL_PATTERN.replace_all(s, "[EMAIL_REDACTED]").into_owned();
    out = PHONE_PATTERN.replace_all(&out, "[PHONE_REDACTED]").into_owned();
    out = SSN_PATTERN.replace_all(&out, "[SSN_REDACTED]").into_owned();
    out = CREDIT_CARD_PATTERN
        .replace_all(&out, "[CARD_REDACTED]")
        .into_owned();
    out
}

fn redact_if_pii(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) => JsonValue::String(redact_string(s)),
        other => other.clone(),
    }
}

/// Redact PII from an arbitrary JSON document.
///
/// Field-name matches are masked wholesale; other string values are scrubbed
/// by pattern. Arrays and nested objects are traversed recursively.
pub fn redact_context(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, val) in map {
                if is_pii_field(key) {
                    out.insert(key.clone(), mask_value(val));
                } else {
                    out.insert(key.clone(), redact_context(val));
                }
            }
            JsonValue::Object(out)
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(redact_context).collect())
        }
        other => redact_if_pii(other),
    }
}

/// Sanitize a document for AI processing: full redaction plus truncation of
/// long free-text values.
pub fn sanitize_for_ai(value: &JsonValue) -> JsonValue {
    truncate_long_strings(&redact_context(value))
}

fn truncate_long_strings(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::String(s) if s.chars().count() > AI_MAX_TEXT_LEN => {
            let head: String = s.chars().take(20).collect();
            JsonValue::String(format!("{head}...[TRUNCATED]"))
        }
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), truncate_long_strings(v)))
                .collect(),
        ),
        JsonValue::Array(items) => {
            JsonValue::Array(items.iter().map(truncate_long_strings).collect())
        }
        other => other.clone(),
    }
}

/// Keep only the last four characters of an order id.
pub fn redact_order_id(order_id: &str) -> String {
    last_four(order_id)
}

/// Keep only the last four characters of a tracking number.
pub fn redact_tracking_number(tracking_number: &str) -> String {
    last_four(tracking_number)
}

fn last_four(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 4 {
        s.to_string()
    } else {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{tail}")
    }
}

/// Whether a string is free of known PII patterns.
pub fn is_safe_for_logging(value: &str) -> bool {
    !EMAIL_PATTERN.is_match(value)
        && !PHONE_PATTERN.is_match(value)
        && !SSN_PATTERN.is_match(value)
        && !CREDIT_CARD_PATTERN.is_match(value)
}
