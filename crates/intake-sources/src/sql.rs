//! SQL source adapter.
//!
//! Runs a parameterized extraction query against an upstream PostgreSQL
//! database through a pooled connection. Incremental extraction rides on a
//! monotonic watermark column: the cursor is the serialized last-seen
//! watermark, bound as `$1` (text, NULL on the first run), and the
//! coordinator persists it between runs.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use intake_core::config::SqlSourceConfig;
use intake_core::{IntakeError, RawRecord, Result};
use serde_json::{Map, Number, Value};
use tokio_postgres::types::Type;
use tokio_postgres::{NoTls, Row};
use tracing::debug;

use crate::{FetchPage, SourceAdapter};

/// Adapter for SQL databases with watermark-based incremental extraction.
pub struct SqlSource {
    source_id: String,
    config:    SqlSourceConfig,
    pool:      Option<Pool>,
}

impl SqlSource {
    /// Build the adapter from source configuration.
    #[must_use]
    pub fn new(source_id: impl Into<String>, config: SqlSourceConfig) -> Self {
        Self {
            source_id: source_id.into(),
            config,
            pool: None,
        }
    }

    fn pool(&self) -> Result<&Pool> {
        self.pool.as_ref().ok_or(IntakeError::NotConnected)
    }

    /// The extraction query wrapped with the configured page bound.
    fn paged_query(&self) -> String {
        format!(
            "SELECT * FROM ({}) AS extraction_page LIMIT {}",
            self.config.query.trim_end_matches(';'),
            self.config.batch_rows
        )
    }
}

#[async_trait]
impl SourceAdapter for SqlSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn connect(&mut self) -> Result<()> {
        let mut cfg = Config::new();
        cfg.url = Some(self.config.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| IntakeError::ConnectionUnavailable {
                reason: format!("failed to create connection pool: {e}"),
            })?;

        // Probe before declaring the source connected.
        let client = pool.get().await.map_err(|e| IntakeError::ConnectionUnavailable {
            reason: format!("failed to acquire connection: {e}"),
        })?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| map_db_error(&e))?;

        self.pool = Some(pool);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.pool = None;
    }

    async fn fetch_page(&mut self, cursor: Option<&str>) -> Result<FetchPage> {
        let pool = self.pool()?;
        let client = pool.get().await.map_err(|e| IntakeError::ConnectionUnavailable {
            reason: format!("failed to acquire connection: {e}"),
        })?;

        let query = self.paged_query();
        debug!(source_id = %self.source_id, ?cursor, "running extraction query");
        let rows = if self.config.watermark_column.is_some() {
            client.query(&query, &[&cursor]).await
        } else {
            client.query(&query, &[]).await
        }
        .map_err(|e| map_db_error(&e))?;

        let mut records = Vec::with_capacity(rows.len());
        let mut next_watermark: Option<String> = None;
        for row in &rows {
            let payload = row_to_json(row)?;
            if let Some(column) = &self.config.watermark_column {
                if let Some(value) = payload.get(column.as_str()) {
                    // Rows arrive ordered by the watermark, so the last row
                    // carries the high-water mark.
                    next_watermark = Some(json_scalar_to_string(value));
                }
            }
            let record = RawRecord::new(self.source_id.clone(), payload);
            records.push(match cursor {
                Some(c) => record.with_cursor(c),
                None => record,
            });
        }

        // Without a watermark there is nothing to advance on: one page and
        // done. With one, any non-empty page advances the cursor; the cycle
        // ends on the empty page the `> $1` filter eventually returns. A
        // watermark that failed to advance also ends the cycle, or a
        // constant column would loop forever.
        let next_cursor = if self.config.watermark_column.is_some() && !records.is_empty() {
            let next = next_watermark.filter(|n| Some(n.as_str()) != cursor);
            if next.is_none() {
                debug!(source_id = %self.source_id, "watermark did not advance; stopping");
            }
            next
        } else {
            None
        };

        Ok(FetchPage {
            records,
            next_cursor,
        })
    }
}

/// Render a scalar JSON value as its bare string form for cursor use.
fn json_scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Map a driver error onto the taxonomy, keeping the SQLSTATE when present.
fn map_db_error(err: &tokio_postgres::Error) -> IntakeError {
    IntakeError::Database {
        message:   err.to_string(),
        sql_state: err.code().map(|c| c.code().to_string()),
    }
}

/// Convert one row into a JSON object, column by column.
///
/// Covers the types regulatory extractions actually use; a column of an
/// unmapped type becomes `null` rather than failing the page.
fn row_to_json(row: &Row) -> Result<Value> {
    let mut object = Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            row.try_get::<_, Option<bool>>(idx)
                .map(|v| v.map_or(Value::Null, Value::Bool))
        } else if *ty == Type::INT2 {
            row.try_get::<_, Option<i16>>(idx)
                .map(|v| v.map_or(Value::Null, |n| Value::Number(n.into())))
        } else if *ty == Type::INT4 {
            row.try_get::<_, Option<i32>>(idx)
                .map(|v| v.map_or(Value::Null, |n| Value::Number(n.into())))
        } else if *ty == Type::INT8 {
            row.try_get::<_, Option<i64>>(idx)
                .map(|v| v.map_or(Value::Null, |n| Value::Number(n.into())))
        } else if *ty == Type::FLOAT4 {
            row.try_get::<_, Option<f32>>(idx).map(|v| {
                v.and_then(|n| Number::from_f64(f64::from(n)))
                    .map_or(Value::Null, Value::Number)
            })
        } else if *ty == Type::FLOAT8 {
            row.try_get::<_, Option<f64>>(idx)
                .map(|v| v.and_then(Number::from_f64).map_or(Value::Null, Value::Number))
        } else if *ty == Type::TIMESTAMPTZ {
            row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map(|v| v.map_or(Value::Null, |t| Value::String(t.to_rfc3339())))
        } else if *ty == Type::TIMESTAMP {
            row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map(|v| v.map_or(Value::Null, |t| Value::String(t.to_string())))
        } else if *ty == Type::DATE {
            row.try_get::<_, Option<chrono::NaiveDate>>(idx)
                .map(|v| v.map_or(Value::Null, |d| Value::String(d.to_string())))
        } else if *ty == Type::UUID {
            row.try_get::<_, Option<uuid::Uuid>>(idx)
                .map(|v| v.map_or(Value::Null, |u| Value::String(u.to_string())))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            row.try_get::<_, Option<Value>>(idx).map(|v| v.unwrap_or(Value::Null))
        } else {
            // Text-ish and unmapped types: take the string form when the
            // driver offers one, null otherwise.
            Ok(row
                .try_get::<_, Option<String>>(idx)
                .unwrap_or(None)
                .map_or(Value::Null, Value::String))
        }
        .map_err(|e| map_db_error(&e))?;
        object.insert(column.name().to_string(), value);
    }
    Ok(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_config(watermark: Option<&str>) -> SqlSourceConfig {
        SqlSourceConfig {
            url:              "postgresql://localhost/upstream".to_string(),
            query:            "SELECT id, updated_at FROM filings \
                               WHERE ($1::text IS NULL OR updated_at > $1::timestamptz) \
                               ORDER BY updated_at;"
                .to_string(),
            watermark_column: watermark.map(str::to_string),
            batch_rows:       100,
        }
    }

    #[test]
    fn paged_query_wraps_and_bounds() {
        let source = SqlSource::new("filings", sql_config(Some("updated_at")));
        let query = source.paged_query();
        assert!(query.starts_with("SELECT * FROM (SELECT id, updated_at"));
        assert!(query.ends_with("LIMIT 100"));
        assert!(!query.contains(';'));
    }

    #[tokio::test]
    async fn fetch_before_connect_is_refused() {
        let mut source = SqlSource::new("filings", sql_config(None));
        let err = source.fetch_page(None).await.expect_err("must refuse");
        assert_eq!(err.code(), intake_core::IntakeErrorCode::NotConnected);
    }

    #[test]
    fn scalar_cursor_rendering_strips_quotes() {
        assert_eq!(
            json_scalar_to_string(&Value::String("2026-01-01T00:00:00Z".to_string())),
            "2026-01-01T00:00:00Z"
        );
        assert_eq!(json_scalar_to_string(&serde_json::json!(42)), "42");
    }
}
