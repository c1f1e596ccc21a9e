//! Ingestion batches: the unit of processing and storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::DataRecord;

/// Batch lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Created, not yet handed to the pipeline
    Pending,
    /// In the pipeline
    Processing,
    /// Every record accounted for, storage succeeded
    Completed,
    /// The batch as a whole failed
    Failed,
    /// Storage succeeded for some records only; the remainder is retried
    Partial,
}

impl BatchStatus {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Partial => "partial",
        }
    }

    /// A batch is immutable once it reaches a terminal status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-batch accounting.
///
/// For a completed batch, `attempted == succeeded + failed + duplicated +
/// rejected` holds by construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Records that entered the pipeline
    pub attempted:  u64,
    /// Records persisted
    pub succeeded:  u64,
    /// Records that failed at the storage layer
    pub failed:     u64,
    /// Records dropped as duplicates
    pub duplicated: u64,
    /// Records rejected by validation or compliance
    pub rejected:   u64,
}

impl BatchStats {
    /// The completed-batch accounting identity.
    #[must_use]
    pub const fn balanced(&self) -> bool {
        self.attempted == self.succeeded + self.failed + self.duplicated + self.rejected
    }
}

/// A set of records processed and stored together as one logical operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionBatch {
    /// Unique batch identifier
    pub batch_id:   Uuid,
    /// Source the records came from
    pub source_id:  String,
    /// Records in source order
    pub records:    Vec<DataRecord>,
    /// When the batch was created
    pub created_at: DateTime<Utc>,
    /// Lifecycle status
    pub status:     BatchStatus,
    /// Accounting, filled in as the batch moves through the system
    pub stats:      BatchStats,
}

impl IngestionBatch {
    /// Create a pending batch from pipeline output.
    #[must_use]
    pub fn new(source_id: impl Into<String>, records: Vec<DataRecord>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            source_id: source_id.into(),
            records,
            created_at: Utc::now(),
            status: BatchStatus::Pending,
            stats: BatchStats::default(),
        }
    }

    /// Number of records in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true for a batch with no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Move the batch to a new status.
    ///
    /// Transitions out of a terminal status are refused; batches are
    /// immutable once completed or failed.
    pub fn set_status(&mut self, status: BatchStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::record::{DataRecord, RawRecord};

    fn batch_of(n: usize) -> IngestionBatch {
        let records = (0..n)
            .map(|i| DataRecord::from_raw(RawRecord::new("src", json!({"i": i}))))
            .collect();
        IngestionBatch::new("src", records)
    }

    #[test]
    fn new_batch_is_pending() {
        let batch = batch_of(3);
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.len(), 3);
        assert!(!batch.is_empty());
    }

    #[test]
    fn terminal_batches_refuse_transitions() {
        let mut batch = batch_of(1);
        assert!(batch.set_status(BatchStatus::Processing));
        assert!(batch.set_status(BatchStatus::Completed));
        assert!(!batch.set_status(BatchStatus::Processing));
        assert_eq!(batch.status, BatchStatus::Completed);
    }

    #[test]
    fn partial_is_not_terminal() {
        let mut batch = batch_of(1);
        assert!(batch.set_status(BatchStatus::Partial));
        assert!(batch.set_status(BatchStatus::Completed));
    }

    #[test]
    fn stats_identity() {
        let stats = BatchStats {
            attempted:  100,
            succeeded:  90,
            failed:     2,
            duplicated: 5,
            rejected:   3,
        };
        assert!(stats.balanced());

        let broken = BatchStats {
            attempted: 100,
            succeeded: 90,
            ..BatchStats::default()
        };
        assert!(!broken.balanced());
    }
}
