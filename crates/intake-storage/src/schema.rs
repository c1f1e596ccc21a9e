//! Declarative table schemas, schema diffs and DDL generation.
//!
//! Identifiers are validated against a strict shape and double-quoted
//! before they reach any statement; values never appear in DDL except as
//! single-quoted, escaped literals. All generation is pure string work so
//! it is unit-testable without a database.

use intake_core::config::{IndexKind, IndexSpec};
use intake_core::{IntakeError, Result};
use serde::{Deserialize, Serialize};

/// One column of a declared table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name
    pub name:        String,
    /// SQL type, e.g. `text`, `timestamptz`, `jsonb`, `double precision`
    pub sql_type:    String,
    /// Whether NULLs are allowed
    #[serde(default = "default_true")]
    pub nullable:    bool,
    /// Default expression literal
    #[serde(default)]
    pub default:     Option<String>,
    /// Part of the primary key
    #[serde(default)]
    pub primary_key: bool,
}

const fn default_true() -> bool {
    true
}

/// A declared table: columns plus secondary indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name:    String,
    /// Columns in declaration order
    pub columns: Vec<ColumnSpec>,
    /// Secondary indexes
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

/// One column alteration inside a [`SchemaDiff`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterColumn {
    /// Column to alter
    pub name:         String,
    /// New SQL type, when changing the type
    #[serde(default)]
    pub new_type:     Option<String>,
    /// New nullability, when changing it
    #[serde(default)]
    pub set_nullable: Option<bool>,
}

/// A declarative schema diff, applied in one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDiff {
    /// Columns to add
    #[serde(default)]
    pub add_columns:   Vec<ColumnSpec>,
    /// Columns to drop
    #[serde(default)]
    pub drop_columns:  Vec<String>,
    /// Columns to alter
    #[serde(default)]
    pub alter_columns: Vec<AlterColumn>,
    /// Indexes to add
    #[serde(default)]
    pub add_indexes:   Vec<IndexSpec>,
    /// Indexes to drop
    #[serde(default)]
    pub drop_indexes:  Vec<String>,
}

impl SchemaDiff {
    /// True when the diff contains no work.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.add_columns.is_empty()
            && self.drop_columns.is_empty()
            && self.alter_columns.is_empty()
            && self.add_indexes.is_empty()
            && self.drop_indexes.is_empty()
    }
}

/// Validate an identifier and return its quoted form.
///
/// # Errors
///
/// `InvalidConfig` when the identifier does not match
/// `[a-z_][a-z0-9_]*` (up to 63 bytes).
pub fn quote_ident(ident: &str) -> Result<String> {
    let valid = !ident.is_empty()
        && ident.len() <= 63
        && ident
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_lowercase() || (i > 0 && c.is_ascii_digit()));
    if !valid {
        return Err(IntakeError::InvalidConfig {
            message: format!("invalid identifier: '{ident}'"),
        });
    }
    Ok(format!("\"{ident}\""))
}

/// Validate a SQL type expression (letters, digits, spaces, parentheses,
/// commas and brackets only).
///
/// # Errors
///
/// `InvalidConfig` when the type contains anything else.
pub fn check_sql_type(sql_type: &str) -> Result<&str> {
    let valid = !sql_type.trim().is_empty()
        && sql_type
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || " (),[]_".contains(c));
    if !valid {
        return Err(IntakeError::InvalidConfig {
            message: format!("invalid SQL type: '{sql_type}'"),
        });
    }
    Ok(sql_type)
}

/// Quote a string literal for DDL (partition bounds, defaults).
#[must_use]
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Render `CREATE TABLE IF NOT EXISTS` DDL for a declared schema.
///
/// # Errors
///
/// `InvalidConfig` when an identifier or type fails validation.
pub fn create_table_sql(schema: &TableSchema) -> Result<String> {
    let table = quote_ident(&schema.name)?;
    let mut parts = Vec::with_capacity(schema.columns.len() + 1);
    let mut pk = Vec::new();
    for column in &schema.columns {
        let name = quote_ident(&column.name)?;
        let sql_type = check_sql_type(&column.sql_type)?;
        let mut part = format!("{name} {sql_type}");
        if !column.nullable {
            part.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            part.push_str(" DEFAULT ");
            part.push_str(&quote_literal(default));
        }
        if column.primary_key {
            pk.push(name.clone());
        }
        parts.push(part);
    }
    if !pk.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", pk.join(", ")));
    }
    Ok(format!("CREATE TABLE IF NOT EXISTS {table} ({})", parts.join(", ")))
}

/// Render `CREATE INDEX IF NOT EXISTS` DDL for one declared index.
///
/// # Errors
///
/// `InvalidConfig` on identifier failures or an index kind/column-count
/// mismatch.
pub fn create_index_sql(table: &str, index: &IndexSpec) -> Result<String> {
    let table_q = quote_ident(table)?;
    let name_q = quote_ident(&index.name)?;
    if index.columns.is_empty() {
        return Err(IntakeError::InvalidConfig {
            message: format!("index '{}' declares no columns", index.name),
        });
    }
    let columns = index
        .columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = match index.kind {
        IndexKind::Single | IndexKind::Composite | IndexKind::Partial => {
            format!("CREATE INDEX IF NOT EXISTS {name_q} ON {table_q} ({columns})")
        },
        IndexKind::DocumentInverted => {
            format!("CREATE INDEX IF NOT EXISTS {name_q} ON {table_q} USING gin ({columns})")
        },
        IndexKind::Spatial => {
            format!("CREATE INDEX IF NOT EXISTS {name_q} ON {table_q} USING gist ({columns})")
        },
    };
    if let Some(predicate) = &index.predicate {
        // Predicates are declared by operators, not end users; still keep
        // them out of the identifier path.
        sql.push_str(" WHERE ");
        sql.push_str(predicate);
    }
    Ok(sql)
}

/// Render the statement list for a schema diff.
///
/// # Errors
///
/// `InvalidConfig` on identifier or type failures.
pub fn alter_table_sql(table: &str, diff: &SchemaDiff) -> Result<Vec<String>> {
    let table_q = quote_ident(table)?;
    let mut statements = Vec::new();
    for column in &diff.add_columns {
        let name = quote_ident(&column.name)?;
        let sql_type = check_sql_type(&column.sql_type)?;
        let mut sql =
            format!("ALTER TABLE {table_q} ADD COLUMN IF NOT EXISTS {name} {sql_type}");
        if !column.nullable {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            sql.push_str(" DEFAULT ");
            sql.push_str(&quote_literal(default));
        }
        statements.push(sql);
    }
    for column in &diff.drop_columns {
        let name = quote_ident(column)?;
        statements.push(format!("ALTER TABLE {table_q} DROP COLUMN IF EXISTS {name}"));
    }
    for alter in &diff.alter_columns {
        let name = quote_ident(&alter.name)?;
        if let Some(new_type) = &alter.new_type {
            let sql_type = check_sql_type(new_type)?;
            statements.push(format!(
                "ALTER TABLE {table_q} ALTER COLUMN {name} TYPE {sql_type} USING {name}::{sql_type}"
            ));
        }
        if let Some(nullable) = alter.set_nullable {
            let action = if nullable { "DROP NOT NULL" } else { "SET NOT NULL" };
            statements.push(format!("ALTER TABLE {table_q} ALTER COLUMN {name} {action}"));
        }
    }
    for index in &diff.add_indexes {
        statements.push(create_index_sql(table, index)?);
    }
    for index in &diff.drop_indexes {
        let name = quote_ident(index)?;
        statements.push(format!("DROP INDEX IF EXISTS {name}"));
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        TableSchema {
            name:    "filing_records".to_string(),
            columns: vec![
                ColumnSpec {
                    name:        "record_id".to_string(),
                    sql_type:    "uuid".to_string(),
                    nullable:    false,
                    default:     None,
                    primary_key: true,
                },
                ColumnSpec {
                    name:        "content".to_string(),
                    sql_type:    "jsonb".to_string(),
                    nullable:    false,
                    default:     None,
                    primary_key: false,
                },
                ColumnSpec {
                    name:        "quality".to_string(),
                    sql_type:    "text".to_string(),
                    nullable:    true,
                    default:     Some("raw".to_string()),
                    primary_key: false,
                },
            ],
            indexes: Vec::new(),
        }
    }

    #[test]
    fn create_table_renders_columns_and_pk() {
        let sql = create_table_sql(&sample_schema()).expect("sql");
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"filing_records\" (\"record_id\" uuid NOT NULL, \
             \"content\" jsonb NOT NULL, \"quality\" text DEFAULT 'raw', \
             PRIMARY KEY (\"record_id\"))"
        );
    }

    #[test]
    fn identifiers_are_validated() {
        assert!(quote_ident("data_records").is_ok());
        assert!(quote_ident("p2026_03").is_ok());
        assert!(quote_ident("Records").is_err());
        assert!(quote_ident("rec;drop table x").is_err());
        assert!(quote_ident("").is_err());
        assert!(quote_ident("1st").is_err());
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn gin_index_uses_the_gin_method() {
        let index = IndexSpec {
            name:      "idx_content".to_string(),
            kind:      IndexKind::DocumentInverted,
            columns:   vec!["content".to_string()],
            predicate: None,
        };
        let sql = create_index_sql("data_records", &index).expect("sql");
        assert_eq!(
            sql,
            "CREATE INDEX IF NOT EXISTS \"idx_content\" ON \"data_records\" USING gin (\"content\")"
        );
    }

    #[test]
    fn partial_index_appends_the_predicate() {
        let index = IndexSpec {
            name:      "idx_rejected".to_string(),
            kind:      IndexKind::Partial,
            columns:   vec!["source_id".to_string()],
            predicate: Some("quality = 'rejected'".to_string()),
        };
        let sql = create_index_sql("data_records", &index).expect("sql");
        assert!(sql.ends_with("WHERE quality = 'rejected'"));
    }

    #[test]
    fn alter_statements_cover_the_diff() {
        let diff = SchemaDiff {
            add_columns:   vec![ColumnSpec {
                name:        "jurisdiction".to_string(),
                sql_type:    "text".to_string(),
                nullable:    true,
                default:     None,
                primary_key: false,
            }],
            drop_columns:  vec!["legacy_flag".to_string()],
            alter_columns: vec![AlterColumn {
                name:         "quality_score".to_string(),
                new_type:     Some("double precision".to_string()),
                set_nullable: Some(true),
            }],
            add_indexes:   Vec::new(),
            drop_indexes:  vec!["idx_old".to_string()],
        };
        let statements = alter_table_sql("data_records", &diff).expect("sql");
        assert_eq!(statements.len(), 5);
        assert!(statements[0].contains("ADD COLUMN IF NOT EXISTS \"jurisdiction\" text"));
        assert!(statements[1].contains("DROP COLUMN IF EXISTS \"legacy_flag\""));
        assert!(statements[2].contains("TYPE double precision"));
        assert!(statements[3].contains("DROP NOT NULL"));
        assert!(statements[4].contains("DROP INDEX IF EXISTS \"idx_old\""));
    }

    #[test]
    fn empty_diff_is_detected() {
        assert!(SchemaDiff::default().is_empty());
    }
}
