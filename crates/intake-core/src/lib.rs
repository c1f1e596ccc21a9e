//! # Intake Core
//!
//! Foundational types for the Intake regulatory data ingestion engine: the
//! record and batch model, canonical content hashing, the coded error
//! taxonomy with recovery classes, per-source configuration, and the
//! metrics recorder shared by every component.
//!
//! The other crates in the workspace build on these types: `intake-sources`
//! fetches [`RawRecord`]s, `intake-pipeline` turns them into [`DataRecord`]s,
//! `intake-storage` persists [`IngestionBatch`]es, and `intake-engine`
//! drives the whole flow.

pub mod batch;
pub mod canonical;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

pub use batch::{BatchStats, BatchStatus, IngestionBatch};
pub use canonical::{canonicalize, content_hash};
pub use config::{SourceConfig, SourceType, StorageTableConfig, WriteStrategy};
pub use error::{ErrorClass, IntakeError, IntakeErrorCode, Result};
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use record::{DataRecord, Quality, RawRecord, StageError, StageKind};
