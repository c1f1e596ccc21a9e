//! In-memory storage adapter.
//!
//! Implements the full [`StorageAdapter`] contract plus the pipeline's
//! duplicate seam over plain maps, so the engine and its tests run without
//! a database. Write semantics mirror the PostgreSQL adapter: upserts never
//! rewrite `record_id` or `ingested_at`, sub-operations commit
//! independently, and an injected failure leaves the earlier sub-operations
//! durable.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::config::{IndexSpec, SourceConfig, StorageTableConfig, WriteStrategy};
use intake_core::{
    BatchStatus, DataRecord, IngestionBatch, IntakeError, Quality, Result,
};
use intake_pipeline::DuplicateStore;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::partition::declared_partitions_sql;
use crate::schema::{SchemaDiff, TableSchema};
use crate::traits::{StorageAdapter, StorageOperation};
use crate::writes::check_key_columns;

#[derive(Debug, Clone)]
struct BatchMeta {
    source_id:  String,
    created_at: DateTime<Utc>,
    status:     BatchStatus,
}

#[derive(Debug, Clone)]
struct SourceRow {
    config:    SourceConfig,
    state:     String,
    cursor:    Option<String>,
    paused_at: Option<DateTime<Utc>>,
}

/// One-shot failure injection for partial-storage tests.
#[derive(Debug, Default)]
struct FailureInjection {
    /// Fail with a deadlock after this many records succeed.
    after_records: Option<u64>,
}

/// In-memory implementation of the storage contract.
#[derive(Default)]
pub struct MemoryStorage {
    records:    RwLock<BTreeMap<Uuid, DataRecord>>,
    batches:    RwLock<HashMap<Uuid, BatchMeta>>,
    sources:    RwLock<HashMap<String, SourceRow>>,
    hashes:     RwLock<HashMap<String, HashSet<String>>>,
    tables:     RwLock<HashMap<String, TableSchema>>,
    partitions: RwLock<HashMap<String, Vec<String>>>,
    inject:     Mutex<FailureInjection>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `store_batch` to deadlock after `n` records
    /// have been written.
    pub fn fail_after_records(&self, n: u64) {
        self.inject.lock().after_records = Some(n);
    }

    /// Number of records currently stored.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    /// Stored records for one source, in ingestion order.
    #[must_use]
    pub fn records_for(&self, source_id: &str) -> Vec<DataRecord> {
        let mut records: Vec<DataRecord> = self
            .records
            .read()
            .values()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.ingested_at);
        records
    }

    fn write_record(&self, record: &DataRecord, strategy: WriteStrategy) -> Result<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.record_id) {
            Some(existing) => {
                if matches!(strategy, WriteStrategy::InsertOnly) {
                    return Err(IntakeError::ConstraintViolation {
                        reason: format!("duplicate key record_id={}", record.record_id),
                    });
                }
                // Identity and provenance survive every rewrite.
                existing.content = record.content.clone();
                existing.content_hash = record.content_hash.clone();
                existing.last_updated = record.last_updated;
                existing.quality = record.quality;
                existing.quality_score = record.quality_score;
                existing.tags = record.tags.clone();
                existing.errors = record.errors.clone();
            },
            None => {
                records.insert(record.record_id, record.clone());
            },
        }
        drop(records);
        self.hashes
            .write()
            .entry(record.source_id.clone())
            .or_default()
            .insert(record.content_hash.clone());
        Ok(())
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn ensure_catalog(&self) -> Result<()> {
        Ok(())
    }

    async fn store_batch(
        &self,
        batch: &IngestionBatch,
        table: &StorageTableConfig,
    ) -> Result<StorageOperation> {
        check_key_columns(&table.conflict_columns)?;
        let mut op = StorageOperation::begin(
            &table.table_name,
            table.strategy,
            batch.records.len() as u64,
        );
        self.batches.write().insert(
            batch.batch_id,
            BatchMeta {
                source_id:  batch.source_id.clone(),
                created_at: batch.created_at,
                status:     BatchStatus::Processing,
            },
        );

        let fail_after = self.inject.lock().after_records.take();
        for record in &batch.records {
            if fail_after.is_some_and(|n| op.succeeded >= n) {
                op.record_failure(IntakeError::Deadlock {
                    reason: "injected deadlock".to_string(),
                });
                break;
            }
            match self.write_record(record, table.strategy) {
                Ok(()) => op.succeeded += 1,
                Err(e) => {
                    op.record_failure(e);
                    break;
                },
            }
        }
        op.failed = op.attempted - op.succeeded;
        op.finish();

        if let Some(meta) = self.batches.write().get_mut(&batch.batch_id) {
            meta.status = op.status;
        }
        Ok(op)
    }

    async fn retrieve_records(
        &self,
        source_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DataRecord>> {
        Ok(self
            .records_for(source_id)
            .into_iter()
            .filter(|r| from.is_none_or(|f| r.ingested_at >= f))
            .filter(|r| to.is_none_or(|t| r.ingested_at <= t))
            .collect())
    }

    async fn update_record_quality(&self, record_id: Uuid, quality: Quality) -> Result<bool> {
        let mut records = self.records.write();
        match records.get_mut(&record_id) {
            Some(record) => {
                record.quality = quality;
                record.touch();
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn create_table_if_absent(&self, schema: &TableSchema) -> Result<()> {
        // Validate exactly like the SQL path would.
        crate::schema::create_table_sql(schema)?;
        self.tables
            .write()
            .entry(schema.name.clone())
            .or_insert_with(|| schema.clone());
        Ok(())
    }

    async fn alter_table_schema(&self, table: &str, diff: &SchemaDiff) -> Result<()> {
        crate::schema::alter_table_sql(table, diff)?;
        let mut tables = self.tables.write();
        let Some(schema) = tables.get_mut(table) else {
            return Err(IntakeError::SchemaMismatch {
                reason: format!("no such table: {table}"),
            });
        };
        for column in &diff.add_columns {
            if !schema.columns.iter().any(|c| c.name == column.name) {
                schema.columns.push(column.clone());
            }
        }
        schema.columns.retain(|c| !diff.drop_columns.contains(&c.name));
        for alter in &diff.alter_columns {
            if let Some(column) = schema.columns.iter_mut().find(|c| c.name == alter.name) {
                if let Some(new_type) = &alter.new_type {
                    column.sql_type = new_type.clone();
                }
                if let Some(nullable) = alter.set_nullable {
                    column.nullable = nullable;
                }
            }
        }
        for index in &diff.add_indexes {
            if !schema.indexes.iter().any(|i| i.name == index.name) {
                schema.indexes.push(index.clone());
            }
        }
        schema.indexes.retain(|i| !diff.drop_indexes.contains(&i.name));
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| IntakeError::SchemaMismatch {
                reason: format!("no such table: {table}"),
            })
    }

    async fn create_indexes(&self, table: &str, indexes: &[IndexSpec]) -> Result<()> {
        for index in indexes {
            crate::schema::create_index_sql(table, index)?;
        }
        let mut tables = self.tables.write();
        if let Some(schema) = tables.get_mut(table) {
            for index in indexes {
                if !schema.indexes.iter().any(|i| i.name == index.name) {
                    schema.indexes.push(index.clone());
                }
            }
        }
        Ok(())
    }

    async fn create_partitions(&self, table: &StorageTableConfig) -> Result<()> {
        let Some(spec) = &table.partition else {
            return Err(IntakeError::InvalidConfig {
                message: "create_partitions called without a partition declaration".to_string(),
            });
        };
        let ddl = declared_partitions_sql(&table.table_name, spec)?;
        let mut partitions = self.partitions.write();
        let children = partitions.entry(table.table_name.clone()).or_default();
        for statement in ddl {
            children.push(statement);
        }
        Ok(())
    }

    async fn vacuum(&self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn analyze(&self, _table: &str) -> Result<()> {
        Ok(())
    }

    async fn save_cursor(&self, source_id: &str, cursor: Option<&str>) -> Result<()> {
        let mut sources = self.sources.write();
        if let Some(row) = sources.get_mut(source_id) {
            row.cursor = cursor.map(str::to_string);
        }
        Ok(())
    }

    async fn load_cursor(&self, source_id: &str) -> Result<Option<String>> {
        Ok(self
            .sources
            .read()
            .get(source_id)
            .and_then(|row| row.cursor.clone()))
    }

    async fn upsert_source_row(
        &self,
        config: &SourceConfig,
        state: &str,
        paused_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut sources = self.sources.write();
        let cursor = sources
            .get(&config.source_id)
            .and_then(|row| row.cursor.clone());
        sources.insert(
            config.source_id.clone(),
            SourceRow {
                config: config.clone(),
                state: state.to_string(),
                cursor,
                paused_at,
            },
        );
        Ok(())
    }

    async fn load_sources(&self) -> Result<Vec<SourceConfig>> {
        let mut configs: Vec<SourceConfig> = self
            .sources
            .read()
            .values()
            .map(|row| row.config.clone())
            .collect();
        configs.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(configs)
    }

    async fn delete_source_row(&self, source_id: &str) -> Result<()> {
        self.sources.write().remove(source_id);
        self.hashes.write().remove(source_id);
        Ok(())
    }
}

#[async_trait]
impl DuplicateStore for MemoryStorage {
    async fn is_duplicate(&self, source_id: &str, content_hash: &str) -> Result<bool> {
        Ok(self
            .hashes
            .read()
            .get(source_id)
            .is_some_and(|set| set.contains(content_hash)))
    }

    async fn remember(&self, source_id: &str, content_hash: &str) -> Result<()> {
        self.hashes
            .write()
            .entry(source_id.to_string())
            .or_default()
            .insert(content_hash.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use intake_core::RawRecord;
    use serde_json::json;

    use super::*;

    fn batch_of(n: usize) -> IngestionBatch {
        let records = (0..n)
            .map(|i| {
                let mut record =
                    DataRecord::from_raw(RawRecord::new("src", json!({"i": i})));
                record.touch();
                record
            })
            .collect();
        IngestionBatch::new("src", records)
    }

    #[tokio::test]
    async fn store_and_retrieve_round_trip() {
        let storage = MemoryStorage::new();
        let batch = batch_of(3);
        let op = storage
            .store_batch(&batch, &StorageTableConfig::default())
            .await
            .expect("store");

        assert_eq!(op.status, BatchStatus::Completed);
        assert_eq!(op.succeeded, 3);
        let records = storage
            .retrieve_records("src", None, None)
            .await
            .expect("retrieve");
        assert_eq!(records.len(), 3);
    }

    #[tokio::test]
    async fn upsert_replay_changes_only_last_updated() {
        let storage = MemoryStorage::new();
        let mut batch = batch_of(2);
        storage
            .store_batch(&batch, &StorageTableConfig::default())
            .await
            .expect("first store");
        let before = storage.records_for("src");

        for record in &mut batch.records {
            record.touch();
        }
        let op = storage
            .store_batch(&batch, &StorageTableConfig::default())
            .await
            .expect("replay");
        assert_eq!(op.status, BatchStatus::Completed);

        let after = storage.records_for("src");
        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!(a.record_id, b.record_id);
            assert_eq!(a.ingested_at, b.ingested_at);
            assert_eq!(a.content, b.content);
            assert_eq!(a.content_hash, b.content_hash);
            assert!(b.last_updated >= a.last_updated);
        }
    }

    #[tokio::test]
    async fn insert_only_fails_on_collision() {
        let storage = MemoryStorage::new();
        let table = StorageTableConfig {
            strategy: WriteStrategy::InsertOnly,
            ..StorageTableConfig::default()
        };

        let batch = batch_of(1);
        storage.store_batch(&batch, &table).await.expect("first store");
        let op = storage.store_batch(&batch, &table).await.expect("replay");
        assert_eq!(op.status, BatchStatus::Failed);
        assert!(matches!(op.failure, Some(IntakeError::ConstraintViolation { .. })));
    }

    #[tokio::test]
    async fn injected_failure_produces_a_partial_operation() {
        let storage = MemoryStorage::new();
        storage.fail_after_records(2);

        let op = storage
            .store_batch(&batch_of(5), &StorageTableConfig::default())
            .await
            .expect("store");
        assert_eq!(op.status, BatchStatus::Partial);
        assert_eq!(op.succeeded, 2);
        assert_eq!(op.failed, 3);
        assert!(matches!(op.failure, Some(IntakeError::Deadlock { .. })));
        assert_eq!(storage.record_count(), 2);
    }

    #[tokio::test]
    async fn duplicate_set_reflects_stored_records() {
        let storage = MemoryStorage::new();
        let batch = batch_of(1);
        let hash = batch.records[0].content_hash.clone();

        assert!(!storage.is_duplicate("src", &hash).await.expect("check"));
        storage
            .store_batch(&batch, &StorageTableConfig::default())
            .await
            .expect("store");
        assert!(storage.is_duplicate("src", &hash).await.expect("check"));
    }

    #[tokio::test]
    async fn quality_update_touches_the_record() {
        let storage = MemoryStorage::new();
        let batch = batch_of(1);
        let id = batch.records[0].record_id;
        storage
            .store_batch(&batch, &StorageTableConfig::default())
            .await
            .expect("store");

        assert!(storage
            .update_record_quality(id, Quality::Validated)
            .await
            .expect("update"));
        assert_eq!(storage.records_for("src")[0].quality, Quality::Validated);
        assert!(!storage
            .update_record_quality(Uuid::new_v4(), Quality::Raw)
            .await
            .expect("update"));
    }

    #[tokio::test]
    async fn cursor_round_trips_through_the_source_row() {
        let storage = MemoryStorage::new();
        let config: SourceConfig = serde_json::from_value(json!({
            "source_id": "filings",
            "source_type": "rest",
            "rest": {"url": "https://api.example.test"}
        }))
        .expect("config");

        storage
            .upsert_source_row(&config, "registered", None)
            .await
            .expect("upsert");
        storage
            .save_cursor("filings", Some("2026-01-01T00:00:00Z"))
            .await
            .expect("save");
        assert_eq!(
            storage.load_cursor("filings").await.expect("load").as_deref(),
            Some("2026-01-01T00:00:00Z")
        );

        // The cursor survives a config update.
        storage
            .upsert_source_row(&config, "idle", None)
            .await
            .expect("upsert again");
        assert!(storage.load_cursor("filings").await.expect("load").is_some());
    }
}
