//! Write-strategy SQL generation over the canonical record columns.
//!
//! Every record table carries the canonical column set; strategy SQL is
//! generated against those columns with numbered placeholders, and values
//! always bind as parameters. Generation is pure string work, unit-tested
//! without a database.

use chrono::{DateTime, Utc};
use intake_core::config::StorageTableConfig;
use intake_core::{DataRecord, IntakeError, Result};
use serde_json::Value;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::schema::quote_ident;

/// The canonical record columns, in parameter order.
pub const CANONICAL_COLUMNS: [&str; 10] = [
    "record_id",
    "source_id",
    "ingested_at",
    "last_updated",
    "content",
    "content_hash",
    "quality",
    "quality_score",
    "tags",
    "errors",
];

/// Columns rewritten by upserts and merges. `record_id` and `ingested_at`
/// are identity and provenance; they are never rewritten.
pub const UPDATE_COLUMNS: [&str; 6] =
    ["content", "last_updated", "quality", "quality_score", "tags", "errors"];

/// One record flattened into owned, bindable column values.
#[derive(Debug)]
pub struct RecordRow {
    /// record_id
    pub record_id:     Uuid,
    /// source_id
    pub source_id:     String,
    /// ingested_at
    pub ingested_at:   DateTime<Utc>,
    /// last_updated
    pub last_updated:  DateTime<Utc>,
    /// content (jsonb)
    pub content:       Value,
    /// content_hash
    pub content_hash:  String,
    /// quality (stable string form)
    pub quality:       String,
    /// quality_score
    pub quality_score: Option<f64>,
    /// tags (jsonb array)
    pub tags:          Value,
    /// errors (jsonb array)
    pub errors:        Value,
}

impl RecordRow {
    /// Flatten one record.
    ///
    /// # Errors
    ///
    /// `Serialization` when the stage-error descriptors cannot be encoded.
    pub fn from_record(record: &DataRecord) -> Result<Self> {
        Ok(Self {
            record_id:     record.record_id,
            source_id:     record.source_id.clone(),
            ingested_at:   record.ingested_at,
            last_updated:  record.last_updated,
            content:       record.content.clone(),
            content_hash:  record.content_hash.clone(),
            quality:       record.quality.as_str().to_string(),
            quality_score: record.quality_score,
            tags:          serde_json::to_value(&record.tags)?,
            errors:        serde_json::to_value(&record.errors)?,
        })
    }

    /// Bindable reference for one canonical column.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` when the column is not canonical.
    pub fn param(&self, column: &str) -> Result<&(dyn ToSql + Sync)> {
        Ok(match column {
            "record_id" => &self.record_id,
            "source_id" => &self.source_id,
            "ingested_at" => &self.ingested_at,
            "last_updated" => &self.last_updated,
            "content" => &self.content,
            "content_hash" => &self.content_hash,
            "quality" => &self.quality,
            "quality_score" => &self.quality_score,
            "tags" => &self.tags,
            "errors" => &self.errors,
            other => {
                return Err(IntakeError::InvalidConfig {
                    message: format!("'{other}' is not a canonical record column"),
                });
            },
        })
    }

    /// Bindable references for a column list, in order.
    ///
    /// # Errors
    ///
    /// See [`param`](RecordRow::param).
    pub fn params_for<'a>(&'a self, columns: &[&str]) -> Result<Vec<&'a (dyn ToSql + Sync)>> {
        columns.iter().map(|c| self.param(c)).collect()
    }
}

/// Validate that configured key columns are canonical.
///
/// # Errors
///
/// `InvalidConfig` naming the first non-canonical column.
pub fn check_key_columns(columns: &[String]) -> Result<()> {
    for column in columns {
        if !CANONICAL_COLUMNS.contains(&column.as_str()) {
            return Err(IntakeError::InvalidConfig {
                message: format!("'{column}' is not a canonical record column"),
            });
        }
    }
    if columns.is_empty() {
        return Err(IntakeError::InvalidConfig {
            message: "key column list is empty".to_string(),
        });
    }
    Ok(())
}

fn column_list() -> String {
    CANONICAL_COLUMNS
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

fn values_clause(rows: usize) -> String {
    let width = CANONICAL_COLUMNS.len();
    (0..rows)
        .map(|row| {
            let placeholders = (1..=width)
                .map(|col| format!("${}", row * width + col))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn update_set_clause() -> String {
    UPDATE_COLUMNS
        .iter()
        .map(|c| format!("\"{c}\" = EXCLUDED.\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Plain multi-row `INSERT`; a key collision fails the statement.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure.
pub fn insert_sql(table: &str, rows: usize) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table)?,
        column_list(),
        values_clause(rows)
    ))
}

/// Multi-row upsert over the configured conflict columns.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure or non-canonical conflict columns.
pub fn upsert_sql(table: &str, rows: usize, conflict_columns: &[String]) -> Result<String> {
    check_key_columns(conflict_columns)?;
    let conflict = conflict_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT ({conflict}) DO UPDATE SET {}",
        quote_ident(table)?,
        column_list(),
        values_clause(rows),
        update_set_clause()
    ))
}

/// Per-record `UPDATE` half of merge-update. Parameters bind the update
/// columns first, then the key columns.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure or non-canonical key columns.
pub fn merge_update_sql(table: &str, key_columns: &[String]) -> Result<String> {
    check_key_columns(key_columns)?;
    let set = UPDATE_COLUMNS
        .iter()
        .enumerate()
        .map(|(i, c)| format!("\"{c}\" = ${}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let base = UPDATE_COLUMNS.len();
    let filter = key_columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("\"{c}\" = ${}", base + i + 1))
        .collect::<Vec<_>>()
        .join(" AND ");
    Ok(format!("UPDATE {} SET {set} WHERE {filter}", quote_ident(table)?))
}

/// The set-based merge out of a staging table, for bulk loads.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure or non-canonical conflict columns.
pub fn bulk_merge_sql(table: &str, staging: &str, conflict_columns: &[String]) -> Result<String> {
    check_key_columns(conflict_columns)?;
    let conflict = conflict_columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({conflict}) DO UPDATE SET {}",
        quote_ident(table)?,
        column_list(),
        column_list(),
        quote_ident(staging)?,
        update_set_clause()
    ))
}

/// The staging table DDL for bulk loads.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure.
pub fn staging_table_sql(table: &str, staging: &str) -> Result<String> {
    Ok(format!(
        "CREATE TEMP TABLE {} (LIKE {} INCLUDING DEFAULTS) ON COMMIT DROP",
        quote_ident(staging)?,
        quote_ident(table)?
    ))
}

/// The effective key columns for merge-update: primary key columns, falling
/// back to conflict columns when none are declared.
#[must_use]
pub fn merge_key_columns(table: &StorageTableConfig) -> &[String] {
    if table.primary_key_columns.is_empty() {
        &table.conflict_columns
    } else {
        &table.primary_key_columns
    }
}

#[cfg(test)]
mod tests {
    use intake_core::{Quality, RawRecord, StageKind};
    use serde_json::json;

    use super::*;

    #[test]
    fn insert_numbers_placeholders_row_major() {
        let sql = insert_sql("data_records", 2).expect("sql");
        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"));
        assert!(sql.contains("($11, $12, $13, $14, $15, $16, $17, $18, $19, $20)"));
    }

    #[test]
    fn upsert_never_rewrites_identity_columns() {
        let sql =
            upsert_sql("data_records", 1, &["record_id".to_string()]).expect("sql");
        assert!(sql.contains("ON CONFLICT (\"record_id\") DO UPDATE SET"));
        assert!(sql.contains("\"content\" = EXCLUDED.\"content\""));
        assert!(sql.contains("\"last_updated\" = EXCLUDED.\"last_updated\""));
        assert!(!sql.contains("\"ingested_at\" = EXCLUDED"));
        assert!(!sql.contains("\"record_id\" = EXCLUDED"));
    }

    #[test]
    fn merge_update_binds_update_then_key_columns() {
        let sql = merge_update_sql("data_records", &["record_id".to_string()]).expect("sql");
        assert!(sql.starts_with("UPDATE \"data_records\" SET \"content\" = $1"));
        assert!(sql.ends_with("WHERE \"record_id\" = $7"));
    }

    #[test]
    fn bulk_merge_reads_from_staging() {
        let sql = bulk_merge_sql("data_records", "staging_load", &["record_id".to_string()])
            .expect("sql");
        assert!(sql.contains("FROM \"staging_load\""));
        assert!(sql.contains("ON CONFLICT (\"record_id\")"));
    }

    #[test]
    fn non_canonical_key_columns_are_rejected() {
        assert!(check_key_columns(&["record_id".to_string()]).is_ok());
        assert!(check_key_columns(&["customer_id".to_string()]).is_err());
        assert!(check_key_columns(&[]).is_err());
    }

    #[test]
    fn record_rows_flatten_every_column() {
        let mut record = DataRecord::from_raw(RawRecord::new("src", json!({"a": 1})));
        record.tags.push("gdpr".to_string());
        record.annotate(StageKind::Enrichment, "enrichment_missing", "no geo entry");
        record.quality = Quality::Enriched;
        record.set_quality_score(0.9);

        let row = RecordRow::from_record(&record).expect("row");
        assert_eq!(row.quality, "enriched");
        assert_eq!(row.tags, json!(["gdpr"]));
        assert_eq!(row.errors[0]["code"], "enrichment_missing");

        let params = row.params_for(&CANONICAL_COLUMNS.to_vec()).expect("params");
        assert_eq!(params.len(), 10);
        assert!(row.param("nonexistent").is_err());
    }
}
