//! PostgreSQL storage adapter.
//!
//! Uses `deadpool-postgres` for connection pooling and `tokio-postgres` for
//! async queries. Record sub-operations commit independently so a mid-batch
//! failure leaves earlier sub-operations durable; deadlocks retry a small
//! bound inside the adapter; a write into a missing time partition creates
//! the partition and retries once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use intake_core::config::{
    IndexSpec, PartitionStrategy, SourceConfig, StorageTableConfig, WriteStrategy,
};
use intake_core::{
    BatchStatus, DataRecord, IngestionBatch, IntakeError, Quality, Result,
};
use intake_pipeline::DuplicateStore;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::partition::{declared_partitions_sql, partition_by_clause, time_partition_sql, time_range};
use crate::schema::{
    alter_table_sql, create_index_sql, create_table_sql, quote_ident, SchemaDiff, TableSchema,
};
use crate::traits::{StorageAdapter, StorageOperation};
use crate::writes::{
    bulk_merge_sql, insert_sql, merge_key_columns, merge_update_sql, staging_table_sql,
    upsert_sql, RecordRow, CANONICAL_COLUMNS, UPDATE_COLUMNS,
};

/// Deadlock retries per sub-operation before the error surfaces.
const DEADLOCK_ATTEMPTS: u32 = 3;

/// Bootstrap DDL for the internal tables.
const CATALOG_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS ingestion_batches (
    batch_id    uuid PRIMARY KEY,
    source_id   text NOT NULL,
    created_at  timestamptz NOT NULL,
    status      text NOT NULL,
    stats       jsonb NOT NULL DEFAULT '{}'::jsonb
);
CREATE TABLE IF NOT EXISTS data_records (
    record_id      uuid PRIMARY KEY,
    source_id      text NOT NULL,
    ingested_at    timestamptz NOT NULL,
    last_updated   timestamptz NOT NULL,
    content        jsonb NOT NULL,
    content_hash   text NOT NULL,
    quality        text NOT NULL,
    quality_score  double precision,
    tags           jsonb NOT NULL DEFAULT '[]'::jsonb,
    errors         jsonb NOT NULL DEFAULT '[]'::jsonb
);
CREATE INDEX IF NOT EXISTS idx_data_records_source_ingested
    ON data_records (source_id, ingested_at);
CREATE INDEX IF NOT EXISTS idx_data_records_source_hash
    ON data_records (source_id, content_hash);
CREATE INDEX IF NOT EXISTS idx_data_records_content
    ON data_records USING gin (content);
CREATE TABLE IF NOT EXISTS ingestion_sources (
    source_id    text PRIMARY KEY,
    source_type  text NOT NULL,
    state        text NOT NULL,
    config       jsonb NOT NULL,
    cursor       text,
    paused_at    timestamptz
);
"#;

/// PostgreSQL implementation of the storage contract.
pub struct PostgresStorage {
    pool: Pool,
}

impl PostgresStorage {
    /// Create the adapter with the default pool size.
    ///
    /// # Errors
    ///
    /// `ConnectionUnavailable` when the pool cannot be created or the probe
    /// query fails.
    pub async fn new(connection_string: &str) -> Result<Self> {
        Self::with_pool_size(connection_string, 10).await
    }

    /// Create the adapter with a custom pool size and probe the connection.
    ///
    /// # Errors
    ///
    /// See [`new`](PostgresStorage::new).
    pub async fn with_pool_size(connection_string: &str, max_size: usize) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.url = Some(connection_string.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(max_size));

        let pool = cfg.create_pool(Some(Runtime::Tokio1), NoTls).map_err(|e| {
            IntakeError::ConnectionUnavailable {
                reason: format!("failed to create connection pool: {e}"),
            }
        })?;

        let client = pool.get().await.map_err(|e| IntakeError::ConnectionUnavailable {
            reason: format!("failed to acquire connection: {e}"),
        })?;
        client
            .query("SELECT 1", &[])
            .await
            .map_err(|e| map_pg_error(&e))?;

        Ok(Self { pool })
    }

    async fn client(&self) -> Result<deadpool_postgres::Object> {
        self.pool.get().await.map_err(|e| IntakeError::ConnectionUnavailable {
            reason: format!("failed to acquire connection: {e}"),
        })
    }

    /// Write one sub-operation, retrying deadlocks and auto-creating a
    /// missing time partition once.
    async fn write_chunk(
        &self,
        records: &[DataRecord],
        table: &StorageTableConfig,
    ) -> Result<u64> {
        let mut deadlocks = 0;
        let mut created_partitions = false;
        loop {
            match self.try_write_chunk(records, table).await {
                Ok(written) => return Ok(written),
                Err(IntakeError::Deadlock { reason }) if deadlocks + 1 < DEADLOCK_ATTEMPTS => {
                    deadlocks += 1;
                    warn!(attempt = deadlocks, %reason, "deadlock, retrying sub-operation");
                    tokio::time::sleep(std::time::Duration::from_millis(
                        50 * u64::from(deadlocks),
                    ))
                    .await;
                },
                Err(IntakeError::PartitionMissing { table: parent, partition })
                    if !created_partitions && is_time_partitioned(table) =>
                {
                    debug!(%parent, %partition, "creating missing time partition");
                    created_partitions = true;
                    self.create_time_partitions_for(records, table).await?;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_write_chunk(
        &self,
        records: &[DataRecord],
        table: &StorageTableConfig,
    ) -> Result<u64> {
        let rows = records
            .iter()
            .map(RecordRow::from_record)
            .collect::<Result<Vec<_>>>()?;
        let mut client = self.client().await?;
        let txn = client.transaction().await.map_err(|e| map_pg_error(&e))?;

        let written = match table.strategy {
            WriteStrategy::InsertOnly => {
                let sql = insert_sql(&table.table_name, rows.len())?;
                let params = flat_params(&rows)?;
                txn.execute(&sql, &params).await.map_err(|e| map_pg_error(&e))?
            },
            WriteStrategy::UpsertOnConflict | WriteStrategy::Partitioned => {
                let sql = upsert_sql(&table.table_name, rows.len(), &table.conflict_columns)?;
                let params = flat_params(&rows)?;
                txn.execute(&sql, &params).await.map_err(|e| map_pg_error(&e))?
            },
            WriteStrategy::MergeUpdate => {
                let keys = merge_key_columns(table);
                let update = merge_update_sql(&table.table_name, keys)?;
                let insert = insert_sql(&table.table_name, 1)?;
                let mut columns: Vec<&str> =
                    UPDATE_COLUMNS.iter().copied().collect();
                columns.extend(keys.iter().map(String::as_str));

                let mut written = 0;
                for row in &rows {
                    let params = row.params_for(&columns)?;
                    let updated =
                        txn.execute(&update, &params).await.map_err(|e| map_pg_error(&e))?;
                    if updated == 0 {
                        let params = row.params_for(&CANONICAL_COLUMNS)?;
                        txn.execute(&insert, &params).await.map_err(|e| map_pg_error(&e))?;
                    }
                    written += 1;
                }
                written
            },
            WriteStrategy::BulkLoad => {
                let staging = "intake_bulk_staging";
                txn.batch_execute(&staging_table_sql(&table.table_name, staging)?)
                    .await
                    .map_err(|e| map_pg_error(&e))?;
                let sql = insert_sql(staging, rows.len())?;
                let params = flat_params(&rows)?;
                txn.execute(&sql, &params).await.map_err(|e| map_pg_error(&e))?;
                txn.execute(
                    &bulk_merge_sql(&table.table_name, staging, &table.conflict_columns)?,
                    &[],
                )
                .await
                .map_err(|e| map_pg_error(&e))?
            },
        };

        txn.commit().await.map_err(|e| map_pg_error(&e))?;
        Ok(written.max(records.len() as u64))
    }

    /// Create the time partitions covering every record in the chunk.
    async fn create_time_partitions_for(
        &self,
        records: &[DataRecord],
        table: &StorageTableConfig,
    ) -> Result<()> {
        let Some(spec) = &table.partition else {
            return Ok(());
        };
        let PartitionStrategy::TimeBased { interval } = &spec.strategy else {
            return Ok(());
        };
        let client = self.client().await?;
        let mut seen = std::collections::HashSet::new();
        for record in records {
            let ts = partition_timestamp(record, &spec.column);
            let range = time_range(ts, *interval);
            if seen.insert(range.start) {
                let ddl = time_partition_sql(&table.table_name, range, *interval)?;
                client.batch_execute(&ddl).await.map_err(|e| map_pg_error(&e))?;
            }
        }
        Ok(())
    }

    async fn upsert_batch_meta(
        &self,
        batch: &IngestionBatch,
        status: BatchStatus,
        op: &StorageOperation,
    ) -> Result<()> {
        let client = self.client().await?;
        let stats = serde_json::json!({
            "attempted": op.attempted,
            "succeeded": op.succeeded,
            "failed": op.failed,
        });
        client
            .execute(
                "INSERT INTO ingestion_batches (batch_id, source_id, created_at, status, stats) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (batch_id) DO UPDATE SET status = $4, stats = $5",
                &[
                    &batch.batch_id,
                    &batch.source_id,
                    &batch.created_at,
                    &status.as_str(),
                    &stats,
                ],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(())
    }
}

fn is_time_partitioned(table: &StorageTableConfig) -> bool {
    matches!(
        table.partition.as_ref().map(|p| &p.strategy),
        Some(PartitionStrategy::TimeBased { .. })
    )
}

/// The timestamp a record routes on for time partitioning. Only the two
/// canonical timestamp columns are routable.
fn partition_timestamp(record: &DataRecord, column: &str) -> DateTime<Utc> {
    if column == "last_updated" {
        record.last_updated
    } else {
        record.ingested_at
    }
}

fn flat_params(rows: &[RecordRow]) -> Result<Vec<&(dyn ToSql + Sync)>> {
    let mut params = Vec::with_capacity(rows.len() * CANONICAL_COLUMNS.len());
    for row in rows {
        params.extend(row.params_for(&CANONICAL_COLUMNS)?);
    }
    Ok(params)
}

/// Map a driver error onto the taxonomy using the SQLSTATE.
fn map_pg_error(err: &tokio_postgres::Error) -> IntakeError {
    let message = err.to_string();
    let Some(state) = err.code() else {
        return IntakeError::ConnectionUnavailable { reason: message };
    };
    let code = state.code();
    match code {
        "40001" | "40P01" => IntakeError::Deadlock { reason: message },
        "23505" | "23502" | "23503" => IntakeError::ConstraintViolation { reason: message },
        // Partition routing failure surfaces as a check violation with a
        // recognizable message.
        "23514" if message.contains("no partition of relation") => {
            IntakeError::PartitionMissing {
                table:     extract_relation(&message).unwrap_or_default(),
                partition: String::new(),
            }
        },
        "23514" => IntakeError::ConstraintViolation { reason: message },
        "42P01" | "42703" | "42804" => IntakeError::SchemaMismatch { reason: message },
        _ if code.starts_with("08") || code.starts_with("53") => {
            IntakeError::ConnectionUnavailable { reason: message }
        },
        _ => IntakeError::Database {
            message,
            sql_state: Some(code.to_string()),
        },
    }
}

fn extract_relation(message: &str) -> Option<String> {
    let start = message.find('"')? + 1;
    let end = message[start..].find('"')? + start;
    Some(message[start..end].to_string())
}

fn record_from_row(row: &Row) -> Result<DataRecord> {
    let quality: String = row.try_get("quality").map_err(|e| map_pg_error(&e))?;
    let tags: Value = row.try_get("tags").map_err(|e| map_pg_error(&e))?;
    let errors: Value = row.try_get("errors").map_err(|e| map_pg_error(&e))?;
    Ok(DataRecord {
        record_id:     row.try_get("record_id").map_err(|e| map_pg_error(&e))?,
        source_id:     row.try_get("source_id").map_err(|e| map_pg_error(&e))?,
        ingested_at:   row.try_get("ingested_at").map_err(|e| map_pg_error(&e))?,
        last_updated:  row.try_get("last_updated").map_err(|e| map_pg_error(&e))?,
        content:       row.try_get("content").map_err(|e| map_pg_error(&e))?,
        content_hash:  row.try_get("content_hash").map_err(|e| map_pg_error(&e))?,
        quality:       Quality::parse(&quality).unwrap_or(Quality::Raw),
        quality_score: row.try_get("quality_score").map_err(|e| map_pg_error(&e))?,
        tags:          serde_json::from_value(tags)?,
        errors:        serde_json::from_value(errors)?,
    })
}

#[async_trait]
impl StorageAdapter for PostgresStorage {
    async fn ensure_catalog(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(CATALOG_DDL)
            .await
            .map_err(|e| map_pg_error(&e))
    }

    async fn store_batch(
        &self,
        batch: &IngestionBatch,
        table: &StorageTableConfig,
    ) -> Result<StorageOperation> {
        let mut op = StorageOperation::begin(
            &table.table_name,
            table.strategy,
            batch.records.len() as u64,
        );
        self.upsert_batch_meta(batch, BatchStatus::Processing, &op).await?;

        // Time partitions are created up front; the error-driven path in
        // write_chunk covers ranges that appear concurrently.
        if is_time_partitioned(table) {
            self.create_time_partitions_for(&batch.records, table).await?;
        }

        let chunk_size = table.batch_size.max(1);
        let chunk_budget = std::time::Duration::from_millis(table.batch_timeout_ms.max(1));
        for chunk in batch.records.chunks(chunk_size) {
            let written = match tokio::time::timeout(chunk_budget, self.write_chunk(chunk, table))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(IntakeError::Database {
                    message:   format!("sub-operation exceeded {}ms", table.batch_timeout_ms),
                    sql_state: None,
                }),
            };
            match written {
                Ok(written) => op.succeeded += written,
                Err(e) => {
                    op.record_failure(e);
                    break;
                },
            }
        }
        op.failed = op.attempted - op.succeeded;
        op.finish();

        self.upsert_batch_meta(batch, op.status, &op).await?;
        debug!(
            batch_id = %batch.batch_id,
            status = %op.status,
            succeeded = op.succeeded,
            failed = op.failed,
            "batch stored"
        );
        Ok(op)
    }

    async fn retrieve_records(
        &self,
        source_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DataRecord>> {
        let client = self.client().await?;
        let mut sql = String::from(
            "SELECT record_id, source_id, ingested_at, last_updated, content, content_hash, \
             quality, quality_score, tags, errors FROM data_records WHERE source_id = $1",
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&source_id];
        let mut index = 2;
        if let Some(from) = &from {
            sql.push_str(&format!(" AND ingested_at >= ${index}"));
            params.push(from);
            index += 1;
        }
        if let Some(to) = &to {
            sql.push_str(&format!(" AND ingested_at <= ${index}"));
            params.push(to);
        }
        sql.push_str(" ORDER BY ingested_at");

        let rows = client.query(&sql, &params).await.map_err(|e| map_pg_error(&e))?;
        rows.iter().map(record_from_row).collect()
    }

    async fn update_record_quality(&self, record_id: Uuid, quality: Quality) -> Result<bool> {
        let client = self.client().await?;
        let updated = client
            .execute(
                "UPDATE data_records SET quality = $2, last_updated = now() WHERE record_id = $1",
                &[&record_id, &quality.as_str()],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(updated == 1)
    }

    async fn create_table_if_absent(&self, schema: &TableSchema) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(&create_table_sql(schema)?)
            .await
            .map_err(|e| map_pg_error(&e))?;
        for index in &schema.indexes {
            client
                .batch_execute(&create_index_sql(&schema.name, index)?)
                .await
                .map_err(|e| map_pg_error(&e))?;
        }
        Ok(())
    }

    async fn alter_table_schema(&self, table: &str, diff: &SchemaDiff) -> Result<()> {
        if diff.is_empty() {
            return Ok(());
        }
        let statements = alter_table_sql(table, diff)?;
        let mut client = self.client().await?;
        let txn = client.transaction().await.map_err(|e| map_pg_error(&e))?;
        for statement in &statements {
            txn.batch_execute(statement).await.map_err(|e| map_pg_error(&e))?;
        }
        txn.commit().await.map_err(|e| map_pg_error(&e))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' ORDER BY table_name",
                &[],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(rows.iter().map(|r| r.get::<_, String>(0)).collect())
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema> {
        let client = self.client().await?;
        let columns = client
            .query(
                "SELECT column_name, data_type, is_nullable, column_default \
                 FROM information_schema.columns \
                 WHERE table_schema = 'public' AND table_name = $1 \
                 ORDER BY ordinal_position",
                &[&table],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        if columns.is_empty() {
            return Err(IntakeError::SchemaMismatch {
                reason: format!("no such table: {table}"),
            });
        }
        let pk_rows = client
            .query(
                "SELECT kcu.column_name \
                 FROM information_schema.table_constraints tc \
                 JOIN information_schema.key_column_usage kcu \
                   ON tc.constraint_name = kcu.constraint_name \
                  AND tc.table_schema = kcu.table_schema \
                 WHERE tc.table_schema = 'public' AND tc.table_name = $1 \
                   AND tc.constraint_type = 'PRIMARY KEY'",
                &[&table],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        let pk: Vec<String> = pk_rows.iter().map(|r| r.get::<_, String>(0)).collect();

        Ok(TableSchema {
            name:    table.to_string(),
            columns: columns
                .iter()
                .map(|row| {
                    let name: String = row.get(0);
                    crate::schema::ColumnSpec {
                        primary_key: pk.contains(&name),
                        name,
                        sql_type: row.get(1),
                        nullable: row.get::<_, String>(2) == "YES",
                        default: row.get(3),
                    }
                })
                .collect(),
            indexes: Vec::new(),
        })
    }

    async fn create_indexes(&self, table: &str, indexes: &[IndexSpec]) -> Result<()> {
        let client = self.client().await?;
        for index in indexes {
            client
                .batch_execute(&create_index_sql(table, index)?)
                .await
                .map_err(|e| map_pg_error(&e))?;
        }
        Ok(())
    }

    async fn create_partitions(&self, table: &StorageTableConfig) -> Result<()> {
        let Some(spec) = &table.partition else {
            return Err(IntakeError::InvalidConfig {
                message: "create_partitions called without a partition declaration".to_string(),
            });
        };
        let client = self.client().await?;

        // The partitioned parent has to exist before any child can attach.
        client
            .batch_execute(&partitioned_records_table_sql(table)?)
            .await
            .map_err(|e| map_pg_error(&e))?;

        if let PartitionStrategy::TimeBased { interval } = &spec.strategy {
            // Current period and the next, so midnight rollover never races
            // the writer.
            let now = Utc::now();
            let current = time_range(now, *interval);
            let next = time_range(current.end, *interval);
            for range in [current, next] {
                client
                    .batch_execute(&time_partition_sql(&table.table_name, range, *interval)?)
                    .await
                    .map_err(|e| map_pg_error(&e))?;
            }
            return Ok(());
        }

        for ddl in declared_partitions_sql(&table.table_name, spec)? {
            client.batch_execute(&ddl).await.map_err(|e| map_pg_error(&e))?;
        }
        Ok(())
    }

    async fn vacuum(&self, table: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(&format!("VACUUM {}", quote_ident(table)?))
            .await
            .map_err(|e| map_pg_error(&e))
    }

    async fn analyze(&self, table: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .batch_execute(&format!("ANALYZE {}", quote_ident(table)?))
            .await
            .map_err(|e| map_pg_error(&e))
    }

    async fn save_cursor(&self, source_id: &str, cursor: Option<&str>) -> Result<()> {
        let client = self.client().await?;
        client
            .execute(
                "UPDATE ingestion_sources SET cursor = $2 WHERE source_id = $1",
                &[&source_id, &cursor],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(())
    }

    async fn load_cursor(&self, source_id: &str) -> Result<Option<String>> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT cursor FROM ingestion_sources WHERE source_id = $1",
                &[&source_id],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(row.and_then(|r| r.get::<_, Option<String>>(0)))
    }

    async fn upsert_source_row(
        &self,
        config: &SourceConfig,
        state: &str,
        paused_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let client = self.client().await?;
        let config_json = serde_json::to_value(config)?;
        client
            .execute(
                "INSERT INTO ingestion_sources (source_id, source_type, state, config, paused_at) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (source_id) DO UPDATE \
                 SET source_type = $2, state = $3, config = $4, paused_at = $5",
                &[
                    &config.source_id,
                    &config.source_type.as_str(),
                    &state,
                    &config_json,
                    &paused_at,
                ],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(())
    }

    async fn load_sources(&self) -> Result<Vec<SourceConfig>> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT config FROM ingestion_sources ORDER BY source_id", &[])
            .await
            .map_err(|e| map_pg_error(&e))?;
        rows.iter()
            .map(|row| {
                let config: Value = row.get(0);
                serde_json::from_value(config).map_err(IntakeError::from)
            })
            .collect()
    }

    async fn delete_source_row(&self, source_id: &str) -> Result<()> {
        let client = self.client().await?;
        client
            .execute("DELETE FROM ingestion_sources WHERE source_id = $1", &[&source_id])
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(())
    }
}

#[async_trait]
impl DuplicateStore for PostgresStorage {
    async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        let client = self.client().await?;
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM data_records \
                 WHERE source_id = $1 AND content_hash = $2)",
                &[&source_id, &content_hash],
            )
            .await
            .map_err(|e| map_pg_error(&e))?;
        Ok(row.get(0))
    }

    async fn remember(&self, _source_id: &str, _content_hash: &str) -> Result<()> {
        // The stored row itself is the persistent mark; nothing extra to do.
        Ok(())
    }
}

/// DDL for a partitioned parent variant of the canonical records table.
///
/// # Errors
///
/// `InvalidConfig` on identifier failure.
pub fn partitioned_records_table_sql(table: &StorageTableConfig) -> Result<String> {
    let Some(spec) = &table.partition else {
        return Err(IntakeError::InvalidConfig {
            message: "partitioned table without a partition declaration".to_string(),
        });
    };
    // Partition keys must be part of the primary key in PostgreSQL, so the
    // parent declares no primary key; uniqueness rides on the conflict
    // columns' per-partition indexes.
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         record_id uuid NOT NULL, \
         source_id text NOT NULL, \
         ingested_at timestamptz NOT NULL, \
         last_updated timestamptz NOT NULL, \
         content jsonb NOT NULL, \
         content_hash text NOT NULL, \
         quality text NOT NULL, \
         quality_score double precision, \
         tags jsonb NOT NULL DEFAULT '[]'::jsonb, \
         errors jsonb NOT NULL DEFAULT '[]'::jsonb\
         ) {}",
        quote_ident(&table.table_name)?,
        partition_by_clause(spec)
    ))
}

#[cfg(test)]
mod tests {
    use intake_core::config::{PartitionInterval, PartitionSpec};

    use super::*;

    #[test]
    fn sqlstate_mapping_covers_the_taxonomy() {
        // map_pg_error is exercised through real driver errors in
        // integration environments; here we pin the classification table
        // indirectly via extract_relation.
        assert_eq!(
            extract_relation(r#"no partition of relation "data_records" found for row"#),
            Some("data_records".to_string())
        );
        assert_eq!(extract_relation("no quotes here"), None);
    }

    #[test]
    fn partition_timestamps_route_on_canonical_columns() {
        let record = DataRecord::from_raw(intake_core::RawRecord::new(
            "src",
            serde_json::json!({"a": 1}),
        ));
        assert_eq!(partition_timestamp(&record, "ingested_at"), record.ingested_at);
        assert_eq!(partition_timestamp(&record, "last_updated"), record.last_updated);
        // Unknown columns fall back to ingestion time.
        assert_eq!(partition_timestamp(&record, "filed_at"), record.ingested_at);
    }

    #[test]
    fn partitioned_parent_ddl_carries_the_partition_clause() {
        let table = StorageTableConfig {
            table_name: "filing_records".to_string(),
            strategy: WriteStrategy::Partitioned,
            partition: Some(PartitionSpec {
                column:   "ingested_at".to_string(),
                strategy: PartitionStrategy::TimeBased {
                    interval: PartitionInterval::Day,
                },
            }),
            ..StorageTableConfig::default()
        };
        let sql = partitioned_records_table_sql(&table).expect("sql");
        assert!(sql.contains("PARTITION BY RANGE (\"ingested_at\")"));
        assert!(!sql.contains("PRIMARY KEY"));
    }
}
