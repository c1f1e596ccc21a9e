//! Per-source and aggregate ingestion metrics.
//!
//! The recorder is a handle injected at construction; components call one
//! narrow method per event. Counter updates for a source are plain atomic
//! increments (one writer: the worker currently holding that source), and
//! `snapshot()` assembles an immutable view without stopping the writers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// A counter-and-sum pair backing one timer.
#[derive(Debug, Default)]
struct TimerCell {
    count:       AtomicU64,
    total_nanos: AtomicU64,
}

impl TimerCell {
    fn record(&self, duration: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.total_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    fn snapshot(&self) -> TimerSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_nanos = self.total_nanos.load(Ordering::Relaxed);
        let total_ms = total_nanos as f64 / 1_000_000.0;
        TimerSnapshot {
            count,
            total_ms,
            mean_ms: if count == 0 { 0.0 } else { total_ms / count as f64 },
        }
    }
}

/// Counters and timers for one source.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    batches_total:      AtomicU64,
    batches_succeeded:  AtomicU64,
    batches_failed:     AtomicU64,
    batches_partial:    AtomicU64,
    records_processed:  AtomicU64,
    records_rejected:   AtomicU64,
    records_duplicated: AtomicU64,
    deferred_ticks:     AtomicU64,
    errors_by_kind:     DashMap<String, u64>,
    fetch:              TimerCell,
    pipeline:           TimerCell,
    storage:            TimerCell,
    end_to_end:         TimerCell,
}

impl SourceMetrics {
    fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            batches_total:      self.batches_total.load(Ordering::Relaxed),
            batches_succeeded:  self.batches_succeeded.load(Ordering::Relaxed),
            batches_failed:     self.batches_failed.load(Ordering::Relaxed),
            batches_partial:    self.batches_partial.load(Ordering::Relaxed),
            records_processed:  self.records_processed.load(Ordering::Relaxed),
            records_rejected:   self.records_rejected.load(Ordering::Relaxed),
            records_duplicated: self.records_duplicated.load(Ordering::Relaxed),
            deferred_ticks:     self.deferred_ticks.load(Ordering::Relaxed),
            errors_by_kind:     self
                .errors_by_kind
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect(),
            fetch_duration:     self.fetch.snapshot(),
            pipeline_duration:  self.pipeline.snapshot(),
            storage_duration:   self.storage.snapshot(),
            end_to_end_latency: self.end_to_end.snapshot(),
        }
    }
}

/// Immutable view of one timer.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct TimerSnapshot {
    /// Observations recorded
    pub count:    u64,
    /// Total observed time in milliseconds
    pub total_ms: f64,
    /// Mean observed time in milliseconds
    pub mean_ms:  f64,
}

/// Immutable view of one source's counters and timers.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct SourceMetricsSnapshot {
    /// Batches that entered the system
    pub batches_total:      u64,
    /// Batches fully stored
    pub batches_succeeded:  u64,
    /// Batches that failed
    pub batches_failed:     u64,
    /// Batches stored partially
    pub batches_partial:    u64,
    /// Records that passed the pipeline
    pub records_processed:  u64,
    /// Records rejected by validation or compliance
    pub records_rejected:   u64,
    /// Records dropped as duplicates
    pub records_duplicated: u64,
    /// Ticks deferred because the work queue was full
    pub deferred_ticks:     u64,
    /// Error counts keyed by stable error-code label
    pub errors_by_kind:     BTreeMap<String, u64>,
    /// Source fetch timing
    pub fetch_duration:     TimerSnapshot,
    /// Pipeline timing
    pub pipeline_duration:  TimerSnapshot,
    /// Storage timing
    pub storage_duration:   TimerSnapshot,
    /// Whole-cycle timing
    pub end_to_end_latency: TimerSnapshot,
}

impl SourceMetricsSnapshot {
    fn absorb(&mut self, other: &SourceMetricsSnapshot) {
        self.batches_total += other.batches_total;
        self.batches_succeeded += other.batches_succeeded;
        self.batches_failed += other.batches_failed;
        self.batches_partial += other.batches_partial;
        self.records_processed += other.records_processed;
        self.records_rejected += other.records_rejected;
        self.records_duplicated += other.records_duplicated;
        self.deferred_ticks += other.deferred_ticks;
        for (kind, count) in &other.errors_by_kind {
            *self.errors_by_kind.entry(kind.clone()).or_insert(0) += count;
        }
        for (mine, theirs) in [
            (&mut self.fetch_duration, &other.fetch_duration),
            (&mut self.pipeline_duration, &other.pipeline_duration),
            (&mut self.storage_duration, &other.storage_duration),
            (&mut self.end_to_end_latency, &other.end_to_end_latency),
        ] {
            mine.count += theirs.count;
            mine.total_ms += theirs.total_ms;
            mine.mean_ms = if mine.count == 0 {
                0.0
            } else {
                mine.total_ms / mine.count as f64
            };
        }
    }
}

/// Full metrics snapshot: per-source views plus the aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// When the snapshot was assembled
    pub generated_at: DateTime<Utc>,
    /// Sum over all sources
    pub totals:       SourceMetricsSnapshot,
    /// Per-source views, keyed by source id
    pub sources:      BTreeMap<String, SourceMetricsSnapshot>,
}

/// The recorder handle shared by every component.
#[derive(Debug, Default, Clone)]
pub struct MetricsRecorder {
    sources: Arc<DashMap<String, Arc<SourceMetrics>>>,
}

impl MetricsRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn source(&self, source_id: &str) -> Arc<SourceMetrics> {
        self.sources
            .entry(source_id.to_string())
            .or_default()
            .clone()
    }

    /// A batch entered the system.
    pub fn batch_started(&self, source_id: &str) {
        self.source(source_id).batches_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was fully stored.
    pub fn batch_succeeded(&self, source_id: &str) {
        self.source(source_id).batches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch failed.
    pub fn batch_failed(&self, source_id: &str) {
        self.source(source_id).batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch was stored partially.
    pub fn batch_partial(&self, source_id: &str) {
        self.source(source_id).batches_partial.fetch_add(1, Ordering::Relaxed);
    }

    /// `n` records passed the pipeline.
    pub fn records_processed(&self, source_id: &str, n: u64) {
        self.source(source_id).records_processed.fetch_add(n, Ordering::Relaxed);
    }

    /// `n` records were rejected.
    pub fn records_rejected(&self, source_id: &str, n: u64) {
        self.source(source_id).records_rejected.fetch_add(n, Ordering::Relaxed);
    }

    /// `n` records were dropped as duplicates.
    pub fn records_duplicated(&self, source_id: &str, n: u64) {
        self.source(source_id).records_duplicated.fetch_add(n, Ordering::Relaxed);
    }

    /// A tick was deferred because the work queue was full.
    pub fn tick_deferred(&self, source_id: &str) {
        self.source(source_id).deferred_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// An error with the given stable kind label occurred.
    pub fn error(&self, source_id: &str, kind: &str) {
        let metrics = self.source(source_id);
        *metrics.errors_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    /// Record a fetch duration.
    pub fn fetch_timed(&self, source_id: &str, duration: Duration) {
        self.source(source_id).fetch.record(duration);
    }

    /// Record a pipeline duration.
    pub fn pipeline_timed(&self, source_id: &str, duration: Duration) {
        self.source(source_id).pipeline.record(duration);
    }

    /// Record a storage duration.
    pub fn storage_timed(&self, source_id: &str, duration: Duration) {
        self.source(source_id).storage.record(duration);
    }

    /// Record a whole-cycle duration.
    pub fn end_to_end_timed(&self, source_id: &str, duration: Duration) {
        self.source(source_id).end_to_end.record(duration);
    }

    /// Drop a source's counters (on unregistration).
    pub fn forget(&self, source_id: &str) {
        self.sources.remove(source_id);
    }

    /// Assemble an immutable snapshot, optionally restricted to one source.
    #[must_use]
    pub fn snapshot(&self, source_id: Option<&str>) -> MetricsSnapshot {
        let mut sources = BTreeMap::new();
        for entry in self.sources.iter() {
            if source_id.is_some_and(|id| id != entry.key().as_str()) {
                continue;
            }
            sources.insert(entry.key().clone(), entry.value().snapshot());
        }
        let mut totals = SourceMetricsSnapshot::default();
        for view in sources.values() {
            totals.absorb(view);
        }
        MetricsSnapshot {
            generated_at: Utc::now(),
            totals,
            sources,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_source() {
        let metrics = MetricsRecorder::new();
        metrics.batch_started("a");
        metrics.batch_started("a");
        metrics.batch_succeeded("a");
        metrics.batch_started("b");
        metrics.records_processed("a", 100);
        metrics.records_duplicated("a", 3);

        let snapshot = metrics.snapshot(None);
        let a = &snapshot.sources["a"];
        assert_eq!(a.batches_total, 2);
        assert_eq!(a.batches_succeeded, 1);
        assert_eq!(a.records_processed, 100);
        assert_eq!(a.records_duplicated, 3);
        assert_eq!(snapshot.sources["b"].batches_total, 1);
        assert_eq!(snapshot.totals.batches_total, 3);
    }

    #[test]
    fn errors_are_keyed_by_kind() {
        let metrics = MetricsRecorder::new();
        metrics.error("a", "transient_transport");
        metrics.error("a", "transient_transport");
        metrics.error("a", "deadlock");

        let snapshot = metrics.snapshot(Some("a"));
        let a = &snapshot.sources["a"];
        assert_eq!(a.errors_by_kind["transient_transport"], 2);
        assert_eq!(a.errors_by_kind["deadlock"], 1);
    }

    #[test]
    fn timers_report_count_and_mean() {
        let metrics = MetricsRecorder::new();
        metrics.fetch_timed("a", Duration::from_millis(10));
        metrics.fetch_timed("a", Duration::from_millis(30));

        let snapshot = metrics.snapshot(Some("a"));
        let fetch = snapshot.sources["a"].fetch_duration;
        assert_eq!(fetch.count, 2);
        assert!((fetch.mean_ms - 20.0).abs() < 1.0);
    }

    #[test]
    fn snapshot_filter_restricts_to_one_source() {
        let metrics = MetricsRecorder::new();
        metrics.batch_started("a");
        metrics.batch_started("b");

        let snapshot = metrics.snapshot(Some("a"));
        assert!(snapshot.sources.contains_key("a"));
        assert!(!snapshot.sources.contains_key("b"));
        assert_eq!(snapshot.totals.batches_total, 1);
    }

    #[test]
    fn forget_drops_the_source() {
        let metrics = MetricsRecorder::new();
        metrics.batch_started("a");
        metrics.forget("a");
        assert!(metrics.snapshot(None).sources.is_empty());
    }
}
