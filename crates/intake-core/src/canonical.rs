//! Canonical JSON serialization and content hashing.
//!
//! Duplicate detection and idempotent replay both depend on one property:
//! two records with the same content must hash identically no matter how the
//! source ordered its fields. The canonical form is a compact JSON rendering
//! with object keys emitted in sorted order at every depth; the content hash
//! is the hex SHA-256 digest of that rendering.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Render a JSON value in canonical form.
///
/// Objects are emitted with keys sorted lexicographically, recursively.
/// Arrays keep their order (element order is meaningful in source payloads).
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::with_capacity(128);
    write_canonical(value, &mut out);
    out
}

/// Hex SHA-256 digest of the canonical rendering of `value`.
#[must_use]
pub fn content_hash(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    hex::encode(hasher.finalize())
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        // serde_json's Display for numbers and strings is stable and handles
        // escaping; reuse it instead of reimplementing either.
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            out.push_str(&Value::String(s.clone()).to_string());
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        },
    }
}
