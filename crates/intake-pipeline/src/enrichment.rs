//! Best-effort enrichment from declared reference tables.
//!
//! Enrichment never rejects a record: a missing reference entry or a failed
//! lookup transport is recorded as an `enrichment_missing` annotation and
//! the record continues unchanged otherwise.

use std::collections::HashMap;

use async_trait::async_trait;
use intake_core::config::EnrichmentRule;
use intake_core::{DataRecord, Result, StageKind};
use serde_json::Value;
use tracing::warn;

/// Read-only access to reference tables (geo, customer, product, ...).
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    /// Look up `key` in the named reference table.
    async fn lookup(&self, table: &str, key: &str) -> Result<Option<Value>>;
}

/// In-memory reference tables for tests and small deployments.
#[derive(Debug, Default)]
pub struct InMemoryReferenceLookup {
    tables: HashMap<String, HashMap<String, Value>>,
}

impl InMemoryReferenceLookup {
    /// Create an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry to a reference table.
    #[must_use]
    pub fn with_entry(
        mut self,
        table: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.tables
            .entry(table.into())
            .or_default()
            .insert(key.into(), value);
        self
    }
}

#[async_trait]
impl ReferenceLookup for InMemoryReferenceLookup {
    async fn lookup(&self, table: &str, key: &str) -> Result<Option<Value>> {
        Ok(self.tables.get(table).and_then(|t| t.get(key)).cloned())
    }
}

/// Apply the declared enrichment rules to one record.
pub async fn enrich_record(
    record: &mut DataRecord,
    rules: &[EnrichmentRule],
    lookup: &dyn ReferenceLookup,
) {
    for rule in rules {
        let Some(key) = record
            .content
            .get(&rule.key_field)
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        else {
            record.annotate(
                StageKind::Enrichment,
                "enrichment_missing",
                format!("no usable key in field '{}'", rule.key_field),
            );
            continue;
        };

        match lookup.lookup(&rule.lookup, &key).await {
            Ok(Some(value)) => {
                let mut content = record.content.clone();
                if let Some(object) = content.as_object_mut() {
                    object.insert(rule.target_field.clone(), value);
                }
                record.set_content(content);
            },
            Ok(None) => {
                record.annotate(
                    StageKind::Enrichment,
                    "enrichment_missing",
                    format!("no '{}' entry for key '{key}'", rule.lookup),
                );
            },
            Err(e) => {
                // Lookup transport failures never reject; note and move on.
                warn!(table = %rule.lookup, %key, error = %e, "enrichment lookup failed");
                record.annotate(
                    StageKind::Enrichment,
                    "enrichment_missing",
                    format!("lookup '{}' failed: {e}", rule.lookup),
                );
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use intake_core::{Quality, RawRecord};
    use serde_json::json;

    use super::*;

    fn rule() -> EnrichmentRule {
        EnrichmentRule {
            lookup:       "geo".to_string(),
            key_field:    "region_code".to_string(),
            target_field: "region".to_string(),
        }
    }

    #[tokio::test]
    async fn hit_writes_the_target_field() {
        let lookup = InMemoryReferenceLookup::new().with_entry(
            "geo",
            "DE-BW",
            json!({"name": "Baden-Württemberg"}),
        );
        let mut record =
            DataRecord::from_raw(RawRecord::new("src", json!({"region_code": "DE-BW"})));

        enrich_record(&mut record, &[rule()], &lookup).await;

        assert_eq!(record.content["region"]["name"], "Baden-Württemberg");
        assert!(record.errors.is_empty());
        assert!(record.invariants_hold());
    }

    #[tokio::test]
    async fn miss_annotates_without_rejecting() {
        let lookup = InMemoryReferenceLookup::new();
        let mut record =
            DataRecord::from_raw(RawRecord::new("src", json!({"region_code": "XX"})));

        enrich_record(&mut record, &[rule()], &lookup).await;

        assert_ne!(record.quality, Quality::Rejected);
        assert_eq!(record.errors.len(), 1);
        assert_eq!(record.errors[0].code, "enrichment_missing");
    }

    #[tokio::test]
    async fn missing_key_field_annotates() {
        let lookup = InMemoryReferenceLookup::new();
        let mut record = DataRecord::from_raw(RawRecord::new("src", json!({"other": 1})));

        enrich_record(&mut record, &[rule()], &lookup).await;

        assert_eq!(record.errors.len(), 1);
        assert!(!record.is_rejected());
    }
}
