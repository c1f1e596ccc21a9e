//! Transformation stage: renames, coercions, value maps, date
//! canonicalization.
//!
//! Transformation is tolerant: a value that cannot be coerced or parsed is
//! left as-is with a `transformation:*` annotation. Rejection is the
//! validation stage's job.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use intake_core::config::{TransformationRule, ValueType};
use intake_core::{DataRecord, StageKind};
use serde_json::{Number, Value};

/// Apply the declared transformation rules, in declaration order.
pub fn transform_record(record: &mut DataRecord, rules: &[TransformationRule]) {
    let mut content = record.content.clone();
    let mut notes: Vec<(String, String)> = Vec::new();

    for rule in rules {
        let Some(object) = content.as_object_mut() else {
            notes.push((
                "transformation:not_object".to_string(),
                "content is not an object".to_string(),
            ));
            break;
        };
        match rule {
            TransformationRule::Rename { from, to } => {
                if let Some(value) = object.remove(from) {
                    object.insert(to.clone(), value);
                }
            },
            TransformationRule::Coerce { field, into } => {
                if let Some(value) = object.get(field) {
                    match coerce(value, *into) {
                        Some(coerced) => {
                            object.insert(field.clone(), coerced);
                        },
                        None => notes.push((
                            format!("transformation:coerce:{field}"),
                            format!("cannot coerce field '{field}'"),
                        )),
                    }
                }
            },
            TransformationRule::MapValues { field, mapping } => {
                if let Some(value) = object.get(field) {
                    let key = match value {
                        Value::String(s) => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        Value::Bool(b) => Some(b.to_string()),
                        _ => None,
                    };
                    if let Some(mapped) = key.and_then(|k| mapping.get(&k)) {
                        object.insert(field.clone(), mapped.clone());
                    }
                }
            },
            TransformationRule::CanonicalizeDate { field } => {
                if let Some(value) = object.get(field) {
                    match canonical_date(value) {
                        Some(iso) => {
                            object.insert(field.clone(), Value::String(iso));
                        },
                        None => notes.push((
                            format!("transformation:date:{field}"),
                            format!("cannot parse field '{field}' as a date"),
                        )),
                    }
                }
            },
        }
    }

    if content != record.content {
        record.set_content(content);
    }
    for (code, message) in notes {
        record.annotate(StageKind::Transformation, code, message);
    }
}

/// Coerce a value into the target JSON type, returning None when the
/// conversion is not meaningful.
fn coerce(value: &Value, into: ValueType) -> Option<Value> {
    if into.matches(value) {
        return Some(value.clone());
    }
    match into {
        ValueType::String => match value {
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        ValueType::Number => match value {
            Value::String(s) => {
                let trimmed = s.trim();
                trimmed
                    .parse::<i64>()
                    .ok()
                    .map(|n| Value::Number(n.into()))
                    .or_else(|| {
                        trimmed
                            .parse::<f64>()
                            .ok()
                            .and_then(Number::from_f64)
                            .map(Value::Number)
                    })
            },
            Value::Bool(b) => Some(Value::Number(i64::from(*b).into())),
            _ => None,
        },
        ValueType::Boolean => match value {
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(Value::Bool(true)),
                "false" | "no" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            Value::Number(n) => n.as_f64().map(|f| Value::Bool(f != 0.0)),
            _ => None,
        },
        ValueType::Array | ValueType::Object => None,
    }
}

/// Parse a date in any accepted form and render it as ISO-8601 UTC.
fn canonical_date(value: &Value) -> Option<String> {
    let rendered = |dt: DateTime<Utc>| dt.to_rfc3339_opts(SecondsFormat::Secs, true);
    match value {
        // Unix epoch seconds.
        Value::Number(n) => {
            let secs = n.as_i64()?;
            Utc.timestamp_opt(secs, 0).single().map(rendered)
        },
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(rendered(dt.with_timezone(&Utc)));
            }
            if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
                return Some(rendered(dt.with_timezone(&Utc)));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(rendered(Utc.from_utc_datetime(&naive)));
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                let naive = date.and_hms_opt(0, 0, 0)?;
                return Some(rendered(Utc.from_utc_datetime(&naive)));
            }
            None
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use intake_core::RawRecord;
    use serde_json::json;

    use super::*;

    fn record(content: Value) -> DataRecord {
        DataRecord::from_raw(RawRecord::new("src", content))
    }

    #[test]
    fn rename_moves_the_field() {
        let rules = [TransformationRule::Rename {
            from: "amt".to_string(),
            to:   "amount".to_string(),
        }];
        let mut rec = record(json!({"amt": 10}));
        transform_record(&mut rec, &rules);

        assert_eq!(rec.content, json!({"amount": 10}));
        assert!(rec.invariants_hold());
    }

    #[test]
    fn string_to_number_coercion() {
        let rules = [TransformationRule::Coerce {
            field: "amount".to_string(),
            into:  ValueType::Number,
        }];
        let mut rec = record(json!({"amount": "42"}));
        transform_record(&mut rec, &rules);
        assert_eq!(rec.content["amount"], json!(42));

        let mut fractional = record(json!({"amount": " 3.5 "}));
        transform_record(&mut fractional, &rules);
        assert_eq!(fractional.content["amount"], json!(3.5));
    }

    #[test]
    fn failed_coercion_annotates_without_rejecting() {
        let rules = [TransformationRule::Coerce {
            field: "amount".to_string(),
            into:  ValueType::Number,
        }];
        let mut rec = record(json!({"amount": "n/a"}));
        transform_record(&mut rec, &rules);

        assert_eq!(rec.content["amount"], "n/a");
        assert!(!rec.is_rejected());
        assert_eq!(rec.errors[0].code, "transformation:coerce:amount");
    }

    #[test]
    fn value_mapping_replaces_enumerations() {
        let mut mapping = HashMap::new();
        mapping.insert("D".to_string(), json!("debit"));
        mapping.insert("C".to_string(), json!("credit"));
        let rules = [TransformationRule::MapValues {
            field: "side".to_string(),
            mapping,
        }];

        let mut rec = record(json!({"side": "D"}));
        transform_record(&mut rec, &rules);
        assert_eq!(rec.content["side"], "debit");

        let mut unmapped = record(json!({"side": "X"}));
        transform_record(&mut unmapped, &rules);
        assert_eq!(unmapped.content["side"], "X");
    }

    #[test]
    fn dates_canonicalize_to_utc() {
        let rules = [TransformationRule::CanonicalizeDate {
            field: "filed_at".to_string(),
        }];

        let mut offset = record(json!({"filed_at": "2026-03-01T10:00:00+02:00"}));
        transform_record(&mut offset, &rules);
        assert_eq!(offset.content["filed_at"], "2026-03-01T08:00:00Z");

        let mut bare = record(json!({"filed_at": "2026-03-01"}));
        transform_record(&mut bare, &rules);
        assert_eq!(bare.content["filed_at"], "2026-03-01T00:00:00Z");

        let mut epoch = record(json!({"filed_at": 1_767_225_600}));
        transform_record(&mut epoch, &rules);
        assert_eq!(epoch.content["filed_at"], "2026-01-01T00:00:00Z");
    }

    #[test]
    fn rules_apply_in_declaration_order() {
        let rules = [
            TransformationRule::Rename {
                from: "amt".to_string(),
                to:   "amount".to_string(),
            },
            TransformationRule::Coerce {
                field: "amount".to_string(),
                into:  ValueType::Number,
            },
        ];
        let mut rec = record(json!({"amt": "7"}));
        transform_record(&mut rec, &rules);
        assert_eq!(rec.content, json!({"amount": 7}));
    }
}
