//! # Intake Storage
//!
//! The relational storage engine: one [`StorageAdapter`] contract with a
//! PostgreSQL implementation (deadpool-postgres over tokio-postgres) and an
//! in-memory implementation for tests. Batches persist under a configurable
//! write strategy (insert-only, upsert, merge-update, bulk-load,
//! partitioned), tables and indexes materialize from declared schemas, and
//! partitions are managed for the four partitioning strategies. Both
//! adapters double as the pipeline's authoritative duplicate-hash set.

pub mod memory;
pub mod partition;
pub mod postgres;
pub mod schema;
pub mod traits;
pub mod writes;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;
pub use schema::{AlterColumn, ColumnSpec, SchemaDiff, TableSchema};
pub use traits::{StorageAdapter, StorageOperation};
