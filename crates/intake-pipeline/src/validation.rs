//! Validation stage: declared rules over the raw content.
//!
//! Validation runs before transformation, so numeric rules accept both JSON
//! numbers and numeric strings. A record failing any rule is marked
//! rejected with a `validation:<rule>` reason code and leaves the
//! downstream flow; it is still persisted for audit when the source has
//! `audit_rejected` set.

use intake_core::config::ValidationRule;
use intake_core::{DataRecord, StageKind};
use serde_json::Value;

/// Apply the declared validation rules to one record.
pub fn validate_record(record: &mut DataRecord, rules: &[ValidationRule]) {
    for rule in rules {
        if let Some(message) = violation(&record.content, rule) {
            record.reject(StageKind::Validation, format!("validation:{}", rule.describe()), message);
        }
    }
}

/// Returns the failure message when `content` violates `rule`.
fn violation(content: &Value, rule: &ValidationRule) -> Option<String> {
    match rule {
        ValidationRule::Required { field } => {
            let present = content.get(field).is_some_and(|v| !v.is_null());
            (!present).then(|| format!("field '{field}' is required"))
        },
        ValidationRule::TypeIs { field, expected } => match content.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => (!expected.matches(value))
                .then(|| format!("field '{field}' has the wrong type")),
        },
        ValidationRule::Range { field, min, max } => {
            let Some(n) = numeric(content.get(field)) else {
                return Some(format!("field '{field}' is not numeric"));
            };
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                Some(format!("field '{field}' value {n} is out of range"))
            } else {
                None
            }
        },
        ValidationRule::Format { field, pattern } => {
            let Some(text) = content.get(field).and_then(Value::as_str) else {
                return Some(format!("field '{field}' is not a string"));
            };
            // Patterns are compile-checked at registration; a failure here
            // means the config store was edited out-of-band.
            let Ok(re) = regex::Regex::new(pattern) else {
                return Some(format!("format pattern for '{field}' does not compile"));
            };
            (!re.is_match(text)).then(|| format!("field '{field}' does not match format"))
        },
        ValidationRule::NonEmpty { field } => {
            let empty = match content.get(field) {
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(Value::Array(a)) => a.is_empty(),
                Some(Value::Null) | None => true,
                Some(_) => false,
            };
            empty.then(|| format!("field '{field}' is empty"))
        },
        ValidationRule::Compare { field, op, value } => {
            let Some(n) = numeric(content.get(field)) else {
                return Some(format!("field '{field}' is not numeric"));
            };
            (!op.eval(n, *value))
                .then(|| format!("field '{field}' value {n} fails {}{value}", op.symbol()))
        },
    }
}

/// Numeric view of a field: JSON numbers directly, numeric strings parsed.
fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
