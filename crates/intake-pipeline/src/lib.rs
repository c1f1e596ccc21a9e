//! # Intake Pipeline
//!
//! The ordered processing pipeline: validation, cleaning, transformation,
//! enrichment, quality scoring, duplicate detection, compliance and storage
//! preparation. Stage order is fixed; a source's configuration can only
//! disable stages. Record order is preserved end-to-end, rejected records
//! short-circuit the mutating stages but still collect compliance
//! annotations, and the whole batch fails with `PipelineInternal` when a
//! stage violates its contract.

pub mod cleaning;
pub mod compliance;
pub mod duplicate;
pub mod enrichment;
pub mod prepare;
pub mod quality;
pub mod transformation;
pub mod validation;

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use intake_core::config::SourceConfig;
use intake_core::{DataRecord, IntakeError, RawRecord, Result, StageKind};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use duplicate::{CachedDuplicateStore, DuplicateStore, MemoryDuplicateStore};
pub use enrichment::{InMemoryReferenceLookup, ReferenceLookup};

/// What came out of one batch run.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Records bound for storage, in source order
    pub accepted:   Vec<DataRecord>,
    /// Rejected records, persisted only when the source audits rejects
    pub rejected:   Vec<DataRecord>,
    /// Records dropped as duplicates
    pub duplicates: u64,
}

/// The configured pipeline, generic over its two external seams.
pub struct Pipeline {
    lookup:     Arc<dyn ReferenceLookup>,
    duplicates: Arc<dyn DuplicateStore>,
}

impl Pipeline {
    /// Build a pipeline over the given enrichment and duplicate seams.
    #[must_use]
    pub fn new(lookup: Arc<dyn ReferenceLookup>, duplicates: Arc<dyn DuplicateStore>) -> Self {
        Self { lookup, duplicates }
    }

    /// Run one batch through every enabled stage.
    ///
    /// The cancellation token is checked between stages; a stop request
    /// surfaces as [`IntakeError::Cancelled`] and the coordinator abandons
    /// the work item.
    ///
    /// # Errors
    ///
    /// `Cancelled` at a checkpoint, `PipelineInternal` when a stage
    /// panics, or the duplicate store's transient error (the coordinator
    /// retries the batch).
    pub async fn process_batch(
        &self,
        raw: Vec<RawRecord>,
        config: &SourceConfig,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let stages = &config.stages;
        let mut records: Vec<DataRecord> = raw.into_iter().map(DataRecord::from_raw).collect();

        if stages.validation {
            checkpoint(cancel)?;
            run_stage(StageKind::Validation, || {
                for record in &mut records {
                    if !record.is_rejected() {
                        validation::validate_record(record, &config.validation_rules);
                    }
                }
            })?;
        }

        if stages.cleaning {
            checkpoint(cancel)?;
            run_stage(StageKind::Cleaning, || {
                for record in records.iter_mut().filter(|r| !r.is_rejected()) {
                    cleaning::clean_record(record);
                }
            })?;
        }

        if stages.transformation {
            checkpoint(cancel)?;
            run_stage(StageKind::Transformation, || {
                for record in records.iter_mut().filter(|r| !r.is_rejected()) {
                    transformation::transform_record(record, &config.transformation_rules);
                }
            })?;
        }

        if stages.enrichment {
            checkpoint(cancel)?;
            for record in records.iter_mut().filter(|r| !r.is_rejected()) {
                enrichment::enrich_record(record, &config.enrichment_rules, &*self.lookup).await;
            }
        }

        if stages.quality {
            checkpoint(cancel)?;
            run_stage(StageKind::Quality, || {
                for record in records.iter_mut().filter(|r| !r.is_rejected()) {
                    quality::score_record(
                        record,
                        &config.quality_weights,
                        &config.validation_rules,
                        &config.consistency_rules,
                    );
                }
            })?;
        }

        let mut duplicate_flags = vec![false; records.len()];
        let mut duplicate_count = 0u64;
        if stages.duplicate {
            checkpoint(cancel)?;
            let mut seen_in_batch: HashSet<&str> = HashSet::new();
            for (idx, record) in records.iter().enumerate() {
                if record.is_rejected() {
                    continue;
                }
                let repeated = !seen_in_batch.insert(record.content_hash.as_str());
                let seen_before = repeated
                    || self
                        .duplicates
                        .is_duplicate(&record.source_id, &record.content_hash)
                        .await?;
                if seen_before {
                    duplicate_flags[idx] = true;
                    duplicate_count += 1;
                }
            }
        }

        if stages.compliance {
            checkpoint(cancel)?;
            run_stage(StageKind::Compliance, || {
                // Compliance also annotates rejected records so that audited
                // rejects are redacted like everything else.
                for (idx, record) in records.iter_mut().enumerate() {
                    if !duplicate_flags[idx] {
                        compliance::check_record(record, &config.compliance_rules);
                    }
                }
            })?;
        }

        if stages.storage_prep {
            checkpoint(cancel)?;
            run_stage(StageKind::StoragePrep, || {
                for (idx, record) in records.iter_mut().enumerate() {
                    if !duplicate_flags[idx] {
                        prepare::prepare_record(record, stages);
                    }
                }
            })?;
        }

        let mut accepted = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();
        for (record, is_duplicate) in records.into_iter().zip(duplicate_flags) {
            if is_duplicate {
                continue;
            }
            if record.is_rejected() {
                rejected.push(record);
            } else {
                accepted.push(record);
            }
        }

        debug!(
            accepted = accepted.len(),
            rejected = rejected.len(),
            duplicates = duplicate_count,
            "batch processed"
        );
        Ok(ProcessOutcome {
            accepted,
            rejected,
            duplicates: duplicate_count,
        })
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(IntakeError::Cancelled)
    } else {
        Ok(())
    }
}

/// Run a synchronous stage body, converting a panic into the batch-level
/// internal error the contract requires.
fn run_stage(stage: StageKind, body: impl FnOnce()) -> Result<()> {
    catch_unwind(AssertUnwindSafe(body)).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "stage panicked".to_string());
        IntakeError::PipelineInternal {
            stage: stage.as_str().to_string(),
            reason,
        }
    })
}

#[cfg(test)]
mod tests {
    use intake_core::config::{
        CompareOp, ComplianceRule, SourceConfig, StageSet, ValidationRule,
    };
    use intake_core::{IntakeErrorCode, Quality};
    use serde_json::json;

    use super::*;

    fn config(stages: StageSet) -> SourceConfig {
        let mut config: SourceConfig = serde_json::from_value(json!({
            "source_id": "filings",
            "source_type": "rest",
            "rest": {"url": "https://api.example.test/filings"}
        }))
        .expect("config");
        config.stages = stages;
        config
    }

    fn pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(InMemoryReferenceLookup::new()),
            Arc::new(MemoryDuplicateStore::new()),
        )
    }

    fn raw(payloads: Vec<serde_json::Value>) -> Vec<RawRecord> {
        payloads
            .into_iter()
            .map(|p| RawRecord::new("filings", p))
            .collect()
    }

    #[tokio::test]
    async fn all_stages_produce_enriched_records() {
        let outcome = pipeline()
            .process_batch(
                raw(vec![json!({"amount": 1}), json!({"amount": 2})]),
                &config(StageSet::all()),
                &CancellationToken::new(),
            )
            .await
            .expect("outcome");

        assert_eq!(outcome.accepted.len(), 2);
        assert!(outcome.rejected.is_empty());
        for record in &outcome.accepted {
            assert_eq!(record.quality, Quality::Enriched);
            assert!(record.quality_score.is_some());
            assert!(record.invariants_hold());
        }
    }

    #[tokio::test]
    async fn disabled_stages_make_the_pipeline_identity_on_content() {
        let payload = json!({"Name  ": "  messy   value ", "amount": "00"});
        let outcome = pipeline()
            .process_batch(
                raw(vec![payload.clone()]),
                &config(StageSet::none()),
                &CancellationToken::new(),
            )
            .await
            .expect("outcome");

        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].content, payload);
        assert_eq!(outcome.accepted[0].quality, Quality::Raw);
        assert_eq!(outcome.accepted[0].quality_score, None);
    }

    #[tokio::test]
    async fn validation_rejects_and_keeps_order() {
        let mut cfg = config(StageSet::all());
        cfg.validation_rules = vec![ValidationRule::Compare {
            field: "amount".to_string(),
            op:    CompareOp::Gt,
            value: 0.0,
        }];

        let payloads: Vec<_> = (0..10)
            .map(|i| json!({"amount": if i < 3 { 0 } else { i }}))
            .collect();
        let outcome = pipeline()
            .process_batch(raw(payloads), &cfg, &CancellationToken::new())
            .await
            .expect("outcome");

        assert_eq!(outcome.accepted.len(), 7);
        assert_eq!(outcome.rejected.len(), 3);
        for record in &outcome.rejected {
            assert_eq!(record.quality, Quality::Rejected);
            assert_eq!(record.errors[0].code, "validation:amount>0");
        }
        // Source order is preserved within each class.
        let amounts: Vec<i64> = outcome
            .accepted
            .iter()
            .map(|r| r.content["amount"].as_i64().expect("amount"))
            .collect();
        assert_eq!(amounts, vec![3, 4, 5, 6, 7, 8, 9]);
    }

    #[tokio::test]
    async fn duplicates_are_dropped_not_rejected() {
        let store = Arc::new(MemoryDuplicateStore::new());
        let pipeline = Pipeline::new(Arc::new(InMemoryReferenceLookup::new()), store.clone());
        let cfg = config(StageSet::all());

        let first = pipeline
            .process_batch(
                raw(vec![json!({"id": 1}), json!({"id": 2})]),
                &cfg,
                &CancellationToken::new(),
            )
            .await
            .expect("first run");
        assert_eq!(first.duplicates, 0);

        // Simulate successful storage: hashes enter the persistent set.
        for record in &first.accepted {
            store
                .remember(&record.source_id, &record.content_hash)
                .await
                .expect("remember");
        }

        let second = pipeline
            .process_batch(
                raw(vec![json!({"id": 1}), json!({"id": 2}), json!({"id": 3})]),
                &cfg,
                &CancellationToken::new(),
            )
            .await
            .expect("second run");

        assert_eq!(second.duplicates, 2);
        assert_eq!(second.accepted.len(), 1);
        assert!(second.rejected.is_empty());
    }

    #[tokio::test]
    async fn field_order_differences_still_collide() {
        let cfg = config(StageSet::all());
        let outcome = pipeline()
            .process_batch(
                raw(vec![
                    json!({"a": 1, "b": 2}),
                    json!({"b": 2, "a": 1}),
                ]),
                &cfg,
                &CancellationToken::new(),
            )
            .await
            .expect("outcome");

        // The second record is an intra-batch duplicate of the first.
        assert_eq!(outcome.duplicates, 1);
        assert_eq!(outcome.accepted.len(), 1);
    }

    #[tokio::test]
    async fn rejected_records_still_get_compliance_annotations() {
        let mut cfg = config(StageSet::all());
        cfg.validation_rules = vec![ValidationRule::Required {
            field: "filing_id".to_string(),
        }];
        cfg.compliance_rules = vec![ComplianceRule::RedactField {
            field:       "ssn".to_string(),
            replacement: "[REDACTED]".to_string(),
        }];

        let outcome = pipeline()
            .process_batch(
                raw(vec![json!({"ssn": "078-05-1120"})]),
                &cfg,
                &CancellationToken::new(),
            )
            .await
            .expect("outcome");

        let rejected = &outcome.rejected[0];
        assert_eq!(rejected.content["ssn"], "[REDACTED]");
        assert!(rejected.errors.iter().any(|e| e.code == "compliance:redacted"));
        assert!(rejected.errors.iter().any(|e| e.code.starts_with("validation:")));
    }

    #[tokio::test]
    async fn cancellation_aborts_between_stages() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pipeline()
            .process_batch(raw(vec![json!({"a": 1})]), &config(StageSet::all()), &cancel)
            .await
            .expect_err("must cancel");
        assert_eq!(err.code(), IntakeErrorCode::Cancelled);
    }

    #[test]
    fn stage_panics_become_internal_errors() {
        let err = run_stage(StageKind::Cleaning, || panic!("boom")).expect_err("must fail");
        match err {
            IntakeError::PipelineInternal { stage, reason } => {
                assert_eq!(stage, "cleaning");
                assert_eq!(reason, "boom");
            },
            other => panic!("unexpected error: {other}"),
        }
    }
}
