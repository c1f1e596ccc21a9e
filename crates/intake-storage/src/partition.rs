//! Partition naming and DDL for the four partitioning strategies.
//!
//! Child partitions are created idempotently (`IF NOT EXISTS`). For
//! time-based partitioning the adapter auto-creates a partition whenever a
//! write references a range that does not exist yet.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use intake_core::config::{PartitionInterval, PartitionSpec, PartitionStrategy};
use intake_core::{IntakeError, Result};

use crate::schema::{quote_ident, quote_literal};

/// The half-open time range `[start, end)` one partition covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end:   DateTime<Utc>,
}

/// Compute the range containing `ts` for the given interval.
#[must_use]
pub fn time_range(ts: DateTime<Utc>, interval: PartitionInterval) -> TimeRange {
    let day_start = |t: DateTime<Utc>| {
        Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
            .single()
            .unwrap_or(t)
    };
    match interval {
        PartitionInterval::Hour => {
            let start = Utc
                .with_ymd_and_hms(ts.year(), ts.month(), ts.day(), ts.hour(), 0, 0)
                .single()
                .unwrap_or(ts);
            TimeRange {
                start,
                end: start + Duration::hours(1),
            }
        },
        PartitionInterval::Day => {
            let start = day_start(ts);
            TimeRange {
                start,
                end: start + Duration::days(1),
            }
        },
        PartitionInterval::Week => {
            let days_from_monday =
                i64::from(ts.date_naive().weekday().num_days_from_monday());
            let start = day_start(ts) - Duration::days(days_from_monday);
            TimeRange {
                start,
                end: start + Duration::days(7),
            }
        },
        PartitionInterval::Month => {
            let start = Utc
                .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
                .single()
                .unwrap_or(ts);
            let (next_year, next_month) = if ts.month() == 12 {
                (ts.year() + 1, 1)
            } else {
                (ts.year(), ts.month() + 1)
            };
            let end = Utc
                .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                .single()
                .unwrap_or(start);
            TimeRange { start, end }
        },
    }
}

/// Deterministic child-partition name for a time range.
#[must_use]
pub fn time_partition_name(table: &str, range: TimeRange, interval: PartitionInterval) -> String {
    let start = range.start;
    match interval {
        PartitionInterval::Hour => format!(
            "{table}_p{:04}{:02}{:02}_{:02}",
            start.year(),
            start.month(),
            start.day(),
            start.hour()
        ),
        PartitionInterval::Day => {
            format!("{table}_p{:04}{:02}{:02}", start.year(), start.month(), start.day())
        },
        PartitionInterval::Week => {
            let week = start.iso_week();
            format!("{table}_p{:04}w{:02}", week.year(), week.week())
        },
        PartitionInterval::Month => {
            format!("{table}_p{:04}{:02}", start.year(), start.month())
        },
    }
}

/// The `PARTITION BY ...` clause for a parent table.
#[must_use]
pub fn partition_by_clause(spec: &PartitionSpec) -> String {
    let column = &spec.column;
    match &spec.strategy {
        PartitionStrategy::TimeBased { .. } | PartitionStrategy::RangeBased { .. } => {
            format!("PARTITION BY RANGE (\"{column}\")")
        },
        PartitionStrategy::HashBased { .. } => format!("PARTITION BY HASH (\"{column}\")"),
        PartitionStrategy::ListBased { .. } => format!("PARTITION BY LIST (\"{column}\")"),
    }
}

/// DDL for one time-based child partition.
///
/// # Errors
///
/// `InvalidConfig` when the generated name fails identifier validation.
pub fn time_partition_sql(
    table: &str,
    range: TimeRange,
    interval: PartitionInterval,
) -> Result<String> {
    let child = time_partition_name(table, range, interval);
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ({}) TO ({})",
        quote_ident(&child)?,
        quote_ident(table)?,
        quote_literal(&range.start.to_rfc3339()),
        quote_literal(&range.end.to_rfc3339()),
    ))
}

/// DDL for every child partition a declared strategy enumerates. Time-based
/// strategies enumerate nothing here; their children are created on demand
/// around the timestamps actually written.
///
/// # Errors
///
/// `InvalidConfig` on identifier failures or an empty declaration.
pub fn declared_partitions_sql(table: &str, spec: &PartitionSpec) -> Result<Vec<String>> {
    let parent = quote_ident(table)?;
    match &spec.strategy {
        PartitionStrategy::TimeBased { .. } => Ok(Vec::new()),
        PartitionStrategy::RangeBased { ranges } => {
            if ranges.is_empty() {
                return Err(IntakeError::InvalidConfig {
                    message: "range partitioning declares no ranges".to_string(),
                });
            }
            ranges
                .iter()
                .map(|range| {
                    let child = quote_ident(&format!("{table}_{}", range.name))?;
                    Ok(format!(
                        "CREATE TABLE IF NOT EXISTS {child} PARTITION OF {parent} \
                         FOR VALUES FROM ({}) TO ({})",
                        quote_literal(&range.from),
                        quote_literal(&range.to),
                    ))
                })
                .collect()
        },
        PartitionStrategy::HashBased { partitions } => {
            if *partitions == 0 {
                return Err(IntakeError::InvalidConfig {
                    message: "hash partitioning needs a positive partition count".to_string(),
                });
            }
            (0..*partitions)
                .map(|remainder| {
                    let child = quote_ident(&format!("{table}_h{remainder}"))?;
                    Ok(format!(
                        "CREATE TABLE IF NOT EXISTS {child} PARTITION OF {parent} \
                         FOR VALUES WITH (MODULUS {partitions}, REMAINDER {remainder})"
                    ))
                })
                .collect()
        },
        PartitionStrategy::ListBased { lists } => {
            if lists.is_empty() {
                return Err(IntakeError::InvalidConfig {
                    message: "list partitioning declares no value lists".to_string(),
                });
            }
            lists
                .iter()
                .map(|list| {
                    let child = quote_ident(&format!("{table}_{}", list.name))?;
                    let values = list
                        .values
                        .iter()
                        .map(|v| quote_literal(v))
                        .collect::<Vec<_>>()
                        .join(", ");
                    Ok(format!(
                        "CREATE TABLE IF NOT EXISTS {child} PARTITION OF {parent} \
                         FOR VALUES IN ({values})"
                    ))
                })
                .collect()
        },
    }
}

#[cfg(test)]
mod tests {
    use intake_core::config::{ListPartition, RangeBound};

    use super::*;

    fn ts(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 30, 0).single().expect("valid timestamp")
    }

    #[test]
    fn day_ranges_are_half_open_midnight_to_midnight() {
        let range = time_range(ts(2026, 3, 1, 15), PartitionInterval::Day);
        assert_eq!(range.start, ts(2026, 3, 1, 0) - Duration::minutes(30));
        assert_eq!(range.end - range.start, Duration::days(1));
    }

    #[test]
    fn week_ranges_start_on_monday() {
        // 2026-03-04 is a Wednesday.
        let range = time_range(ts(2026, 3, 4, 9), PartitionInterval::Week);
        assert_eq!(range.start.weekday(), chrono::Weekday::Mon);
        assert_eq!(range.end - range.start, Duration::days(7));
    }

    #[test]
    fn month_rollover_handles_december() {
        let range = time_range(ts(2026, 12, 15, 0), PartitionInterval::Month);
        assert_eq!(range.end.year(), 2027);
        assert_eq!(range.end.month(), 1);
    }

    #[test]
    fn partition_names_are_stable() {
        let day = time_range(ts(2026, 3, 1, 15), PartitionInterval::Day);
        assert_eq!(
            time_partition_name("data_records", day, PartitionInterval::Day),
            "data_records_p20260301"
        );
        let hour = time_range(ts(2026, 3, 1, 15), PartitionInterval::Hour);
        assert_eq!(
            time_partition_name("data_records", hour, PartitionInterval::Hour),
            "data_records_p20260301_15"
        );
    }

    #[test]
    fn time_partition_ddl_is_idempotent_and_bounded() {
        let range = time_range(ts(2026, 3, 1, 15), PartitionInterval::Day);
        let sql = time_partition_sql("data_records", range, PartitionInterval::Day).expect("sql");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"data_records_p20260301\""));
        assert!(sql.contains("FOR VALUES FROM ('2026-03-01T00:00:00+00:00')"));
    }

    #[test]
    fn hash_partitions_enumerate_every_remainder() {
        let spec = PartitionSpec {
            column:   "source_id".to_string(),
            strategy: PartitionStrategy::HashBased { partitions: 4 },
        };
        let ddl = declared_partitions_sql("data_records", &spec).expect("ddl");
        assert_eq!(ddl.len(), 4);
        assert!(ddl[2].contains("MODULUS 4, REMAINDER 2"));
    }

    #[test]
    fn list_partitions_quote_their_values() {
        let spec = PartitionSpec {
            column:   "jurisdiction".to_string(),
            strategy: PartitionStrategy::ListBased {
                lists: vec![ListPartition {
                    name:   "eu".to_string(),
                    values: vec!["DE".to_string(), "FR".to_string()],
                }],
            },
        };
        let ddl = declared_partitions_sql("data_records", &spec).expect("ddl");
        assert_eq!(ddl.len(), 1);
        assert!(ddl[0].contains("FOR VALUES IN ('DE', 'FR')"));
    }

    #[test]
    fn range_partitions_use_declared_bounds() {
        let spec = PartitionSpec {
            column:   "amount".to_string(),
            strategy: PartitionStrategy::RangeBased {
                ranges: vec![RangeBound {
                    name: "small".to_string(),
                    from: "0".to_string(),
                    to:   "1000".to_string(),
                }],
            },
        };
        let ddl = declared_partitions_sql("data_records", &spec).expect("ddl");
        assert!(ddl[0].contains("FOR VALUES FROM ('0') TO ('1000')"));
    }

    #[test]
    fn empty_declarations_are_rejected() {
        let spec = PartitionSpec {
            column:   "x".to_string(),
            strategy: PartitionStrategy::RangeBased { ranges: Vec::new() },
        };
        assert!(declared_partitions_sql("t", &spec).is_err());
    }
}
