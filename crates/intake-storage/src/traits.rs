//! The storage adapter contract and its runtime accounting type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use intake_core::config::{IndexSpec, SourceConfig, StorageTableConfig, WriteStrategy};
use intake_core::{BatchStatus, DataRecord, IngestionBatch, Quality, Result};
use uuid::Uuid;

use crate::schema::{SchemaDiff, TableSchema};

/// Accounting for one `store_batch` call. Created when a batch enters the
/// adapter, reported to metrics, then dropped.
#[derive(Debug, Clone)]
pub struct StorageOperation {
    /// Unique operation identifier
    pub operation_id: Uuid,
    /// Target table
    pub table:        String,
    /// Strategy that was applied
    pub strategy:     WriteStrategy,
    /// When the operation started
    pub started_at:   DateTime<Utc>,
    /// When the operation reached a terminal status
    pub finished_at:  DateTime<Utc>,
    /// Records handed to the adapter
    pub attempted:    u64,
    /// Records durably written
    pub succeeded:    u64,
    /// Records not written
    pub failed:       u64,
    /// Terminal status: completed, partial or failed
    pub status:       BatchStatus,
    /// Failure descriptions, at most one per sub-operation
    pub errors:       Vec<String>,
    /// The typed error that stopped the operation, for recovery-class
    /// decisions upstream
    pub failure:      Option<intake_core::IntakeError>,
}

impl StorageOperation {
    /// Start accounting for a batch write.
    #[must_use]
    pub fn begin(table: impl Into<String>, strategy: WriteStrategy, attempted: u64) -> Self {
        let now = Utc::now();
        Self {
            operation_id: Uuid::new_v4(),
            table: table.into(),
            strategy,
            started_at: now,
            finished_at: now,
            attempted,
            succeeded: 0,
            failed: 0,
            status: BatchStatus::Processing,
            errors: Vec::new(),
            failure: None,
        }
    }

    /// Note the error that stopped the operation.
    pub fn record_failure(&mut self, error: intake_core::IntakeError) {
        self.errors.push(error.to_string());
        self.failure = Some(error);
    }

    /// Close the operation, deriving the terminal status from the counts.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.status = if self.failed == 0 {
            BatchStatus::Completed
        } else if self.succeeded == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };
    }
}

/// Relational storage engine contract.
///
/// One implementation talks to PostgreSQL through a connection pool; the
/// in-memory implementation backs the engine tests. Both also implement the
/// pipeline's `DuplicateStore` seam, since the persisted `content_hash`
/// column is the authoritative duplicate set.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Materialize the internal tables (batches, records, sources).
    async fn ensure_catalog(&self) -> Result<()>;

    /// Persist one batch under the configured write strategy.
    ///
    /// Records are written in sub-operations of `table.batch_size`; each
    /// sub-operation commits independently, so a mid-batch failure leaves
    /// the earlier sub-operations durable and the operation reports
    /// `partial`. The batch metadata row is upserted alongside.
    async fn store_batch(
        &self,
        batch: &IngestionBatch,
        table: &StorageTableConfig,
    ) -> Result<StorageOperation>;

    /// Filtered retrieval by source and ingestion-time range.
    async fn retrieve_records(
        &self,
        source_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<DataRecord>>;

    /// Update one record's quality level. Returns false when the record does
    /// not exist.
    async fn update_record_quality(&self, record_id: Uuid, quality: Quality) -> Result<bool>;

    /// Create a table from a declared schema when it does not exist yet.
    async fn create_table_if_absent(&self, schema: &TableSchema) -> Result<()>;

    /// Apply a declarative schema diff in a single transaction.
    async fn alter_table_schema(&self, table: &str, diff: &SchemaDiff) -> Result<()>;

    /// List user tables.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Introspect a table's schema.
    async fn get_table_schema(&self, table: &str) -> Result<TableSchema>;

    /// Create the declared indexes, idempotently.
    async fn create_indexes(&self, table: &str, indexes: &[IndexSpec]) -> Result<()>;

    /// Create the partitions a table config declares (all of them for
    /// range/hash/list, the current and next period for time-based).
    async fn create_partitions(&self, table: &StorageTableConfig) -> Result<()>;

    /// Reclaim dead rows.
    async fn vacuum(&self, table: &str) -> Result<()>;

    /// Refresh planner statistics.
    async fn analyze(&self, table: &str) -> Result<()>;

    /// Persist a source's cursor (SQL watermark or page position).
    async fn save_cursor(&self, source_id: &str, cursor: Option<&str>) -> Result<()>;

    /// Load a source's persisted cursor.
    async fn load_cursor(&self, source_id: &str) -> Result<Option<String>>;

    /// Insert or update a source's registration row.
    async fn upsert_source_row(
        &self,
        config: &SourceConfig,
        state: &str,
        paused_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Load every registered source's configuration.
    async fn load_sources(&self) -> Result<Vec<SourceConfig>>;

    /// Remove a source's registration row.
    async fn delete_source_row(&self, source_id: &str) -> Result<()>;
}
