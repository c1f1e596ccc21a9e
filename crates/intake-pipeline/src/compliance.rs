//! Compliance stage: declared redaction and prohibition rules.
//!
//! Compliance runs for every record, including already-rejected ones, so
//! that audit-persisted rejects are redacted too. Redaction annotates,
//! prohibition rejects, tag rules append.

use intake_core::config::ComplianceRule;
use intake_core::{DataRecord, StageKind};
use serde_json::Value;

/// Apply the declared compliance rules to one record.
pub fn check_record(record: &mut DataRecord, rules: &[ComplianceRule]) {
    for rule in rules {
        match rule {
            ComplianceRule::RedactField { field, replacement } => {
                let present = record
                    .content
                    .get(field)
                    .is_some_and(|v| !v.is_null());
                if present {
                    let mut content = record.content.clone();
                    if let Some(object) = content.as_object_mut() {
                        object.insert(field.clone(), Value::String(replacement.clone()));
                    }
                    record.set_content(content);
                    record.annotate(
                        StageKind::Compliance,
                        "compliance:redacted",
                        format!("field '{field}' redacted"),
                    );
                }
            },
            ComplianceRule::ForbidField { field } => {
                if record.content.get(field).is_some() {
                    record.reject(
                        StageKind::Compliance,
                        format!("compliance:forbidden:{field}"),
                        format!("field '{field}' must not be present"),
                    );
                }
            },
            ComplianceRule::RequireTag { tag } => {
                if !record.tags.contains(tag) {
                    record.tags.push(tag.clone());
                }
            },
        }
    }
}
