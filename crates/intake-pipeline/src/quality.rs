//! Quality scoring stage.
//!
//! The score is a weighted combination of four components, each in [0, 1]:
//! completeness (populated fraction of fields), accuracy (declared format
//! rules passing post-cleaning), consistency (declared cross-field rules
//! holding) and timeliness (freshness against `ingested_at`, one-day
//! half-life). Weights are normalized, so they need not sum to one.

use chrono::Utc;
use intake_core::config::{ConsistencyRule, QualityWeights, ValidationRule};
use intake_core::DataRecord;
use serde_json::Value;

/// Half-life of the timeliness component, in seconds (one day).
const TIMELINESS_HALF_LIFE_SECS: f64 = 86_400.0;

/// Score one record and store the result on it.
pub fn score_record(
    record: &mut DataRecord,
    weights: &QualityWeights,
    format_rules: &[ValidationRule],
    consistency_rules: &[ConsistencyRule],
) {
    let completeness = completeness(&record.content);
    let accuracy = accuracy(&record.content, format_rules);
    let consistency = consistency(&record.content, consistency_rules);
    let timeliness = timeliness(record);

    let total = weights.completeness + weights.accuracy + weights.consistency + weights.timeliness;
    let score = if total <= 0.0 {
        0.0
    } else {
        (completeness * weights.completeness
            + accuracy * weights.accuracy
            + consistency * weights.consistency
            + timeliness * weights.timeliness)
            / total
    };
    record.set_quality_score(score);
}

/// Populated fraction of top-level fields.
fn completeness(content: &Value) -> f64 {
    match content {
        Value::Object(map) => {
            if map.is_empty() {
                return 0.0;
            }
            let populated = map
                .values()
                .filter(|v| match v {
                    Value::Null => false,
                    Value::String(s) => !s.is_empty(),
                    _ => true,
                })
                .count();
            populated as f64 / map.len() as f64
        },
        Value::Null => 0.0,
        _ => 1.0,
    }
}

/// Fraction of declared format rules that pass. No rules means full marks.
fn accuracy(content: &Value, rules: &[ValidationRule]) -> f64 {
    let format_rules: Vec<_> = rules
        .iter()
        .filter_map(|r| match r {
            ValidationRule::Format { field, pattern } => Some((field, pattern)),
            _ => None,
        })
        .collect();
    if format_rules.is_empty() {
        return 1.0;
    }
    let passing = format_rules
        .iter()
        .filter(|(field, pattern)| {
            content
                .get(field.as_str())
                .and_then(Value::as_str)
                .zip(regex::Regex::new(pattern).ok())
                .is_some_and(|(text, re)| re.is_match(text))
        })
        .count();
    passing as f64 / format_rules.len() as f64
}

/// Fraction of declared cross-field rules that hold.
fn consistency(content: &Value, rules: &[ConsistencyRule]) -> f64 {
    if rules.is_empty() {
        return 1.0;
    }
    let holding = rules
        .iter()
        .filter(|rule| {
            let lhs = numeric(content.get(&rule.left));
            let rhs = numeric(content.get(&rule.right));
            match (lhs, rhs) {
                (Some(l), Some(r)) => rule.op.eval(l, r),
                _ => false,
            }
        })
        .count();
    holding as f64 / rules.len() as f64
}

/// Exponential freshness decay with a one-day half-life.
fn timeliness(record: &DataRecord) -> f64 {
    let age = (Utc::now() - record.ingested_at).num_seconds().max(0) as f64;
    0.5_f64.powf(age / TIMELINESS_HALF_LIFE_SECS)
}

fn numeric(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use intake_core::RawRecord;
    use intake_core::config::CompareOp;
    use serde_json::json;

    use super::*;

    fn record(content: Value) -> DataRecord {
        DataRecord::from_raw(RawRecord::new("src", content))
    }

    #[test]
    fn fresh_complete_record_scores_high() {
        let mut rec = record(json!({"a": 1, "b": "x"}));
        score_record(&mut rec, &QualityWeights::default(), &[], &[]);

        let score = rec.quality_score.expect("scored");
        assert!(score > 0.95, "expected near-perfect score, got {score}");
    }

    #[test]
    fn null_fields_reduce_completeness() {
        let mut rec = record(json!({"a": 1, "b": null, "c": "", "d": 2}));
        score_record(
            &mut rec,
            &QualityWeights {
                completeness: 1.0,
                accuracy:     0.0,
                consistency:  0.0,
                timeliness:   0.0,
            },
            &[],
            &[],
        );
        assert_eq!(rec.quality_score, Some(0.5));
    }

    #[test]
    fn failing_format_rules_reduce_accuracy() {
        let rules = [
            ValidationRule::Format {
                field:   "lei".to_string(),
                pattern: "^[A-Z0-9]{20}$".to_string(),
            },
            ValidationRule::Format {
                field:   "iso_date".to_string(),
                pattern: r"^\d{4}-\d{2}-\d{2}$".to_string(),
            },
        ];
        let mut rec = record(json!({"lei": "bad", "iso_date": "2026-03-01"}));
        score_record(
            &mut rec,
            &QualityWeights {
                completeness: 0.0,
                accuracy:     1.0,
                consistency:  0.0,
                timeliness:   0.0,
            },
            &rules,
            &[],
        );
        assert_eq!(rec.quality_score, Some(0.5));
    }

    #[test]
    fn consistency_rules_compare_fields() {
        let rules = [ConsistencyRule {
            left:  "net".to_string(),
            op:    CompareOp::Le,
            right: "gross".to_string(),
        }];

        let mut ok = record(json!({"net": 80, "gross": 100}));
        score_record(
            &mut ok,
            &QualityWeights {
                completeness: 0.0,
                accuracy:     0.0,
                consistency:  1.0,
                timeliness:   0.0,
            },
            &[],
            &rules,
        );
        assert_eq!(ok.quality_score, Some(1.0));

        let mut bad = record(json!({"net": 120, "gross": 100}));
        score_record(
            &mut bad,
            &QualityWeights {
                completeness: 0.0,
                accuracy:     0.0,
                consistency:  1.0,
                timeliness:   0.0,
            },
            &[],
            &rules,
        );
        assert_eq!(bad.quality_score, Some(0.0));
    }

    #[test]
    fn zero_weights_produce_zero_score() {
        let mut rec = record(json!({"a": 1}));
        score_record(
            &mut rec,
            &QualityWeights {
                completeness: 0.0,
                accuracy:     0.0,
                consistency:  0.0,
                timeliness:   0.0,
            },
            &[],
            &[],
        );
        assert_eq!(rec.quality_score, Some(0.0));
    }

    #[test]
    fn stale_records_lose_timeliness() {
        let mut rec = record(json!({"a": 1}));
        rec.ingested_at = Utc::now() - chrono::Duration::days(1);
        rec.last_updated = Utc::now();
        score_record(
            &mut rec,
            &QualityWeights {
                completeness: 0.0,
                accuracy:     0.0,
                consistency:  0.0,
                timeliness:   1.0,
            },
            &[],
            &[],
        );
        let score = rec.quality_score.expect("scored");
        assert!((score - 0.5).abs() < 0.05, "one-day-old record should score ~0.5, got {score}");
    }
}
