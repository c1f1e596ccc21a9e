//! The ingestion coordinator.
//!
//! Owns the lifecycle of every registered source and drives the
//! fetch-process-store flow: a scheduler task generates ticks per source
//! mode, a bounded FIFO queue carries them to a fixed worker pool, and a
//! per-source mutex keeps at most one work item in flight per source so
//! intra-source record order is preserved. Failures classify into the
//! retry/backoff and circuit-breaker logic; stop requests cancel at the
//! next cooperative checkpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use intake_core::config::{IngestionMode, SourceConfig, SourceType};
use intake_core::{
    ErrorClass, IngestionBatch, IntakeError, IntakeErrorCode, MetricsRecorder, MetricsSnapshot,
    RawRecord, Result,
};
use intake_pipeline::{CachedDuplicateStore, DuplicateStore, Pipeline, ReferenceLookup};
use intake_sources::SourceAdapter;
use intake_storage::StorageAdapter;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::backoff_delay;
use crate::breaker::{BreakerState, CircuitBreaker};
use crate::factory::AdapterFactory;
use crate::fsm::{SourceEvent, SourceFsm, SourcePhase};
use crate::schedule::next_fetch_at;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size
    pub workers:               usize,
    /// Bounded work-queue capacity
    pub queue_capacity:        usize,
    /// Scheduler scan interval in milliseconds
    pub scheduler_interval_ms: u64,
    /// Pages accumulated per cycle before the cycle yields
    pub max_pages_per_cycle:   u32,
    /// Per-source duplicate LRU capacity
    pub duplicate_cache_size:  usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers:               8,
            queue_capacity:        64,
            scheduler_interval_ms: 200,
            max_pages_per_cycle:   50,
            duplicate_cache_size:  4_096,
        }
    }
}

/// Health view over the engine.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Whether the worker pool is running
    pub running:        bool,
    /// Sources in any started phase
    pub sources_active: usize,
    /// Workers currently executing a work item
    pub workers_busy:   usize,
    /// Work items waiting in the queue
    pub queue_depth:    usize,
    /// Per-source breaker states
    pub breakers:       Vec<BreakerHealth>,
}

/// One source's breaker state in the health view.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    /// Source id
    pub source_id: String,
    /// Breaker state
    pub state:     BreakerState,
    /// Lifecycle phase
    pub phase:     SourcePhase,
}

#[derive(Debug)]
enum WorkKind {
    Cycle,
    Ingest(Vec<RawRecord>),
}

struct WorkItem {
    source_id: String,
    kind:      WorkKind,
}

#[derive(Debug, Default)]
struct SourceRuntime {
    last_fetch_at:   Option<DateTime<Utc>>,
    next_fetch_at:   Option<DateTime<Utc>>,
    backoff_until:   Option<Instant>,
    needs_reconnect: bool,
    stop_requested:  bool,
    pause_requested: bool,
    internal_streak: u32,
}

struct SourceEntry {
    config:  RwLock<SourceConfig>,
    fsm:     Mutex<SourceFsm>,
    runtime: Mutex<SourceRuntime>,
    breaker: Mutex<CircuitBreaker>,
    cancel:  Mutex<CancellationToken>,
    queued:  AtomicBool,
    busy:    tokio::sync::Mutex<()>,
    adapter: tokio::sync::Mutex<Option<Box<dyn SourceAdapter>>>,
}

impl SourceEntry {
    fn new(config: SourceConfig) -> Self {
        let breaker = CircuitBreaker::new(config.breaker);
        Self {
            config:  RwLock::new(config),
            fsm:     Mutex::new(SourceFsm::new()),
            runtime: Mutex::new(SourceRuntime::default()),
            breaker: Mutex::new(breaker),
            cancel:  Mutex::new(CancellationToken::new()),
            queued:  AtomicBool::new(false),
            busy:    tokio::sync::Mutex::new(()),
            adapter: tokio::sync::Mutex::new(None),
        }
    }

    fn phase(&self) -> SourcePhase {
        self.fsm.lock().phase()
    }
}

struct EngineInner {
    config:       EngineConfig,
    storage:      Arc<dyn StorageAdapter>,
    duplicates:   Arc<CachedDuplicateStore>,
    pipeline:     Pipeline,
    factory:      Arc<dyn AdapterFactory>,
    metrics:      MetricsRecorder,
    sources:      DashMap<String, Arc<SourceEntry>>,
    work_tx:      mpsc::Sender<WorkItem>,
    work_rx:      Mutex<Option<mpsc::Receiver<WorkItem>>>,
    shutdown:     CancellationToken,
    started:      AtomicBool,
    workers_busy: AtomicUsize,
    tasks:        Mutex<Vec<JoinHandle<()>>>,
}

/// The public engine handle. Clone-cheap; all state lives behind the inner
/// arc.
#[derive(Clone)]
pub struct IngestionEngine {
    inner: Arc<EngineInner>,
}

impl IngestionEngine {
    /// Assemble an engine over its collaborators.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        storage: Arc<dyn StorageAdapter>,
        duplicates: Arc<dyn DuplicateStore>,
        lookup: Arc<dyn ReferenceLookup>,
        factory: Arc<dyn AdapterFactory>,
        metrics: MetricsRecorder,
    ) -> Self {
        let duplicates = Arc::new(CachedDuplicateStore::new(
            duplicates,
            config.duplicate_cache_size,
        ));
        let (work_tx, work_rx) = mpsc::channel(config.queue_capacity.max(1));
        let pipeline = Pipeline::new(lookup, duplicates.clone() as Arc<dyn DuplicateStore>);
        Self {
            inner: Arc::new(EngineInner {
                config,
                storage,
                duplicates,
                pipeline,
                factory,
                metrics,
                sources: DashMap::new(),
                work_tx,
                work_rx: Mutex::new(Some(work_rx)),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                workers_busy: AtomicUsize::new(0),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Spawn the scheduler and the worker pool. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(rx) = self.inner.work_rx.lock().take() else {
            return;
        };
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut tasks = self.inner.tasks.lock();

        for worker_id in 0..self.inner.config.workers.max(1) {
            let engine = self.clone();
            let rx = rx.clone();
            tasks.push(tokio::spawn(async move {
                engine.worker_loop(worker_id, rx).await;
            }));
        }

        let engine = self.clone();
        tasks.push(tokio::spawn(async move {
            engine.scheduler_loop().await;
        }));
        info!(workers = self.inner.config.workers, "ingestion engine started");
    }

    /// Cancel every source and stop the pool.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        for entry in self.inner.sources.iter() {
            entry.cancel.lock().cancel();
        }
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("ingestion engine stopped");
    }

    // ── Admin surface ───────────────────────────────────────────────────

    /// Register a new source.
    ///
    /// # Errors
    ///
    /// `AlreadyExists` on an id collision, `InvalidConfig` when the
    /// configuration fails validation.
    pub async fn register(&self, config: SourceConfig) -> Result<()> {
        config.validate()?;
        let source_id = config.source_id.clone();
        if self.inner.sources.contains_key(&source_id) {
            return Err(IntakeError::AlreadyExists { source_id });
        }
        self.inner
            .storage
            .upsert_source_row(&config, SourcePhase::Registered.as_str(), None)
            .await?;
        self.inner
            .sources
            .insert(source_id.clone(), Arc::new(SourceEntry::new(config)));
        info!(%source_id, "source registered");
        Ok(())
    }

    /// Unregister a stopped source and dispose its runtime state.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`, or `FsmInvalidTransition` when the source is not
    /// stopped.
    pub async fn unregister(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        if entry.phase() != SourcePhase::Registered {
            return Err(IntakeError::FsmInvalidTransition {
                from:  entry.phase().as_str().to_string(),
                event: "unregister".to_string(),
            });
        }
        self.inner.sources.remove(source_id);
        self.inner.metrics.forget(source_id);
        self.inner.duplicates.forget_source(source_id);
        self.inner.storage.delete_source_row(source_id).await?;
        info!(%source_id, "source unregistered");
        Ok(())
    }

    /// Start a registered source.
    ///
    /// # Errors
    ///
    /// `SourceUnknown` or `FsmInvalidTransition`.
    pub async fn start_source(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        entry.fsm.lock().apply(SourceEvent::Start)?;
        {
            let mut runtime = entry.runtime.lock();
            *runtime = SourceRuntime::default();
        }
        *entry.cancel.lock() = CancellationToken::new();
        self.persist_state(&entry, None).await;
        self.enqueue(&entry, source_id);
        info!(%source_id, "source starting");
        Ok(())
    }

    /// Stop a source, cancelling in-flight work at the next checkpoint.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`.
    pub async fn stop_source(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        if entry.phase() == SourcePhase::Registered {
            return Ok(());
        }
        entry.runtime.lock().stop_requested = true;
        entry.cancel.lock().cancel();

        // No work in flight: finalize immediately while holding the
        // single-flight guard.
        if let Ok(_guard) = entry.busy.try_lock() {
            self.finalize_stop(&entry).await;
        }
        info!(%source_id, "source stop requested");
        Ok(())
    }

    /// Pause a source; in-flight work finishes first.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`, or `FsmInvalidTransition` when already paused.
    pub async fn pause(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        if let Ok(_guard) = entry.busy.try_lock() {
            entry.fsm.lock().apply(SourceEvent::Pause)?;
            self.persist_state(&entry, Some(Utc::now())).await;
        } else {
            if entry.phase() == SourcePhase::Paused {
                return Err(IntakeError::FsmInvalidTransition {
                    from:  "paused".to_string(),
                    event: "pause".to_string(),
                });
            }
            entry.runtime.lock().pause_requested = true;
        }
        info!(%source_id, "source paused");
        Ok(())
    }

    /// Resume a paused source into its prior phase.
    ///
    /// # Errors
    ///
    /// `SourceUnknown` or `FsmInvalidTransition`.
    pub async fn resume(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        entry.runtime.lock().pause_requested = false;
        entry.fsm.lock().apply(SourceEvent::Resume)?;
        self.persist_state(&entry, None).await;
        info!(%source_id, "source resumed");
        Ok(())
    }

    /// Fire one cycle for a batch-mode source.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`, `FsmInvalidTransition` when not idle, or
    /// `QueueSaturated`.
    pub fn trigger(&self, source_id: &str) -> Result<()> {
        let entry = self.entry(source_id)?;
        if entry.phase() != SourcePhase::Idle {
            return Err(IntakeError::FsmInvalidTransition {
                from:  entry.phase().as_str().to_string(),
                event: "trigger".to_string(),
            });
        }
        self.enqueue_or_error(source_id, WorkKind::Cycle)
    }

    /// Push records into a realtime source, bypassing the fetch stage.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`, `InvalidConfig` for non-realtime sources,
    /// `FsmInvalidTransition` when the source is not started, or
    /// `QueueSaturated`.
    pub fn ingest(&self, source_id: &str, records: Vec<RawRecord>) -> Result<()> {
        let entry = self.entry(source_id)?;
        if entry.config.read().mode != IngestionMode::Realtime {
            return Err(IntakeError::InvalidConfig {
                message: format!("source '{source_id}' does not accept pushed records"),
            });
        }
        match entry.phase() {
            SourcePhase::Registered | SourcePhase::Paused => {
                return Err(IntakeError::FsmInvalidTransition {
                    from:  entry.phase().as_str().to_string(),
                    event: "ingest".to_string(),
                });
            },
            _ => {},
        }
        self.enqueue_or_error(source_id, WorkKind::Ingest(records))
    }

    /// Filtered retrieval from storage.
    ///
    /// # Errors
    ///
    /// Storage errors pass through.
    pub async fn query_records(
        &self,
        source_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<intake_core::DataRecord>> {
        self.inner.storage.retrieve_records(source_id, from, to).await
    }

    /// Metrics snapshot, optionally restricted to one source.
    #[must_use]
    pub fn metrics_snapshot(&self, source_id: Option<&str>) -> MetricsSnapshot {
        self.inner.metrics.snapshot(source_id)
    }

    /// Health view.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let breakers = self
            .inner
            .sources
            .iter()
            .map(|entry| BreakerHealth {
                source_id: entry.key().clone(),
                state:     entry.breaker.lock().state(),
                phase:     entry.phase(),
            })
            .collect::<Vec<_>>();
        let sources_active = breakers
            .iter()
            .filter(|b| b.phase != SourcePhase::Registered)
            .count();
        HealthReport {
            running: self.inner.started.load(Ordering::SeqCst)
                && !self.inner.shutdown.is_cancelled(),
            sources_active,
            workers_busy: self.inner.workers_busy.load(Ordering::SeqCst),
            queue_depth: self.inner.config.queue_capacity
                - self.inner.work_tx.capacity().min(self.inner.config.queue_capacity),
            breakers,
        }
    }

    /// A source's current lifecycle phase.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`.
    pub fn source_phase(&self, source_id: &str) -> Result<SourcePhase> {
        Ok(self.entry(source_id)?.phase())
    }

    /// A source's current breaker state.
    ///
    /// # Errors
    ///
    /// `SourceUnknown`.
    pub fn breaker_state(&self, source_id: &str) -> Result<BreakerState> {
        Ok(self.entry(source_id)?.breaker.lock().state())
    }

    /// Re-register every source persisted in storage (on service start).
    ///
    /// # Errors
    ///
    /// Storage errors pass through; individually invalid configs are
    /// skipped with a warning.
    pub async fn restore_sources(&self) -> Result<usize> {
        let configs = self.inner.storage.load_sources().await?;
        let mut restored = 0;
        for config in configs {
            let source_id = config.source_id.clone();
            if self.inner.sources.contains_key(&source_id) {
                continue;
            }
            if let Err(e) = config.validate() {
                warn!(%source_id, error = %e, "skipping persisted source with invalid config");
                continue;
            }
            self.inner
                .sources
                .insert(source_id, Arc::new(SourceEntry::new(config)));
            restored += 1;
        }
        Ok(restored)
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn entry(&self, source_id: &str) -> Result<Arc<SourceEntry>> {
        self.inner
            .sources
            .get(source_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| IntakeError::SourceUnknown {
                source_id: source_id.to_string(),
            })
    }

    fn enqueue_or_error(&self, source_id: &str, kind: WorkKind) -> Result<()> {
        self.inner
            .work_tx
            .try_send(WorkItem {
                source_id: source_id.to_string(),
                kind,
            })
            .map_err(|_| {
                self.inner.metrics.tick_deferred(source_id);
                IntakeError::QueueSaturated
            })
    }

    /// Scheduler-side enqueue: marks the source queued, defers on a full
    /// queue, and gives back an unused breaker probe.
    fn enqueue(&self, entry: &SourceEntry, source_id: &str) {
        if entry.queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let sent = self.inner.work_tx.try_send(WorkItem {
            source_id: source_id.to_string(),
            kind:      WorkKind::Cycle,
        });
        if sent.is_err() {
            entry.queued.store(false, Ordering::SeqCst);
            entry.breaker.lock().cancel_probe();
            self.inner.metrics.tick_deferred(source_id);
            debug!(%source_id, "work queue full, tick deferred");
        }
    }

    async fn scheduler_loop(&self) {
        let interval = Duration::from_millis(self.inner.config.scheduler_interval_ms.max(10));
        loop {
            tokio::select! {
                () = self.inner.shutdown.cancelled() => break,
                () = tokio::time::sleep(interval) => {},
            }
            self.scan();
        }
    }

    fn scan(&self) {
        let now = Utc::now();
        for item in self.inner.sources.iter() {
            let (source_id, entry) = (item.key().clone(), item.value().clone());
            if entry.queued.load(Ordering::SeqCst) {
                continue;
            }
            {
                let runtime = entry.runtime.lock();
                if runtime.stop_requested || runtime.pause_requested {
                    continue;
                }
            }
            let due = match entry.phase() {
                // A deferred start/reconnect keeps asking for a slot.
                SourcePhase::Connecting => true,
                SourcePhase::Idle => self.idle_due(&entry, now),
                SourcePhase::Backoff => {
                    let runtime = entry.runtime.lock();
                    runtime.backoff_until.is_none_or(|until| Instant::now() >= until)
                },
                _ => false,
            };
            if !due {
                continue;
            }
            if !entry.breaker.lock().allow_tick() {
                continue;
            }
            self.enqueue(&entry, &source_id);
        }
    }

    fn idle_due(&self, entry: &SourceEntry, now: DateTime<Utc>) -> bool {
        let config = entry.config.read();
        match config.mode {
            IngestionMode::Streaming => true,
            IngestionMode::Batch | IngestionMode::Realtime => false,
            IngestionMode::Scheduled => {
                let mut runtime = entry.runtime.lock();
                let next = match runtime.next_fetch_at {
                    Some(next) => next,
                    None => {
                        let next =
                            next_fetch_at(&config.schedule, runtime.last_fetch_at, now)
                                .unwrap_or(now);
                        runtime.next_fetch_at = Some(next);
                        next
                    },
                };
                now >= next
            },
        }
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>) {
        loop {
            let item = tokio::select! {
                () = self.inner.shutdown.cancelled() => return,
                item = async { rx.lock().await.recv().await } => item,
            };
            let Some(item) = item else { return };
            self.inner.workers_busy.fetch_add(1, Ordering::SeqCst);
            // Panics are isolated to the work item: the worker survives and
            // the source goes into backoff.
            let outcome = std::panic::AssertUnwindSafe(self.handle_item(&item))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!(source_id = %item.source_id, worker_id, "work item panicked");
                if let Ok(entry) = self.entry(&item.source_id) {
                    let _ = entry.fsm.lock().apply(SourceEvent::FetchFail);
                    self.apply_failure_policy(
                        &entry,
                        &IntakeError::PipelineInternal {
                            stage:  "worker".to_string(),
                            reason: "work item panicked".to_string(),
                        },
                    );
                }
            }
            self.inner.workers_busy.fetch_sub(1, Ordering::SeqCst);
        }
    }

    async fn handle_item(&self, item: &WorkItem) {
        let Ok(entry) = self.entry(&item.source_id) else {
            return;
        };
        match &item.kind {
            WorkKind::Cycle => {
                // At most one work item in flight per source; a tick that
                // loses the race is simply skipped.
                let Ok(_guard) = entry.busy.try_lock() else {
                    entry.queued.store(false, Ordering::SeqCst);
                    return;
                };
                entry.queued.store(false, Ordering::SeqCst);
                self.run_scheduled_work(&entry).await;
                self.apply_deferred_requests(&entry).await;
            },
            WorkKind::Ingest(_) => {
                // Pushed records must not be dropped; wait for the slot.
                let _guard = entry.busy.lock().await;
                let WorkKind::Ingest(records) = &item.kind else {
                    return;
                };
                self.run_ingest(&entry, records.clone()).await;
                self.apply_deferred_requests(&entry).await;
            },
        }
    }

    async fn apply_deferred_requests(&self, entry: &Arc<SourceEntry>) {
        let (stop, pause) = {
            let runtime = entry.runtime.lock();
            (runtime.stop_requested, runtime.pause_requested)
        };
        if stop {
            self.finalize_stop(entry).await;
        } else if pause {
            entry.runtime.lock().pause_requested = false;
            if entry.fsm.lock().apply(SourceEvent::Pause).is_ok() {
                self.persist_state(entry, Some(Utc::now())).await;
            }
        }
    }

    async fn run_scheduled_work(&self, entry: &Arc<SourceEntry>) {
        match entry.phase() {
            SourcePhase::Connecting => self.connect_source(entry).await,
            SourcePhase::Idle => {
                if entry.fsm.lock().apply(SourceEvent::Tick).is_ok() {
                    self.run_cycle(entry).await;
                }
            },
            SourcePhase::Backoff => {
                let reconnect = entry.runtime.lock().needs_reconnect;
                if entry
                    .fsm
                    .lock()
                    .apply(SourceEvent::BackoffExpired { reconnect })
                    .is_ok()
                {
                    if reconnect {
                        self.connect_source(entry).await;
                    } else {
                        self.run_cycle(entry).await;
                    }
                }
            },
            // Stale item for a phase that no longer wants work.
            _ => {},
        }
    }

    async fn connect_source(&self, entry: &Arc<SourceEntry>) {
        let config = entry.config.read().clone();
        let source_id = config.source_id.clone();

        let mut adapter_slot = entry.adapter.lock().await;
        if adapter_slot.is_none() {
            match self.inner.factory.build(&config) {
                Ok(adapter) => *adapter_slot = Some(adapter),
                Err(e) => {
                    drop(adapter_slot);
                    error!(%source_id, error = %e, "adapter construction failed");
                    let _ = entry.fsm.lock().apply(SourceEvent::ConnectFail);
                    self.apply_failure_policy(entry, &e);
                    return;
                },
            }
        }
        let adapter = adapter_slot.as_mut().expect("adapter just installed");

        match adapter.connect().await {
            Ok(()) => {
                drop(adapter_slot);
                let _ = entry.fsm.lock().apply(SourceEvent::ConnectOk);
                {
                    let mut runtime = entry.runtime.lock();
                    runtime.needs_reconnect = false;
                    runtime.next_fetch_at = Some(Utc::now());
                }
                self.persist_state(entry, None).await;
                debug!(%source_id, "source connected");
            },
            Err(e) => {
                drop(adapter_slot);
                warn!(%source_id, error = %e, "connect failed");
                let _ = entry.fsm.lock().apply(SourceEvent::ConnectFail);
                entry.runtime.lock().needs_reconnect = true;
                self.apply_failure_policy(entry, &e);
            },
        }
    }

    /// One fetch-process-store cycle.
    async fn run_cycle(&self, entry: &Arc<SourceEntry>) {
        let config = entry.config.read().clone();
        let source_id = config.source_id.clone();
        let cancel = entry.cancel.lock().clone();
        let cycle_start = Instant::now();
        entry.runtime.lock().last_fetch_at = Some(Utc::now());
        entry.runtime.lock().next_fetch_at = None;

        let mut adapter_slot = entry.adapter.lock().await;
        let Some(adapter) = adapter_slot.as_mut() else {
            let _ = entry.fsm.lock().apply(SourceEvent::FetchFail);
            entry.runtime.lock().needs_reconnect = true;
            self.apply_failure_policy(entry, &IntakeError::NotConnected);
            return;
        };

        // Resume from the persisted cursor: the SQL watermark, or a page
        // position left over from a mid-cycle failure.
        let mut cursor = self
            .inner
            .storage
            .load_cursor(&source_id)
            .await
            .unwrap_or_default();
        let mut raw: Vec<RawRecord> = Vec::new();
        let mut pending_failure: Option<IntakeError> = None;
        let mut terminal = false;
        let mut pages = 0_u32;

        loop {
            if cancel.is_cancelled() {
                pending_failure = Some(IntakeError::Cancelled);
                break;
            }
            let fetch_start = Instant::now();
            match adapter.fetch_page(cursor.as_deref()).await {
                Ok(page) => {
                    self.inner.metrics.fetch_timed(&source_id, fetch_start.elapsed());
                    raw.extend(page.records);
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => {
                            terminal = true;
                            break;
                        },
                    }
                    pages += 1;
                    if pages >= self.inner.config.max_pages_per_cycle {
                        // Yield with progress; the cursor resumes the walk.
                        break;
                    }
                },
                Err(e) => {
                    pending_failure = Some(e);
                    break;
                },
            }
        }
        drop(adapter_slot);

        if matches!(pending_failure.as_ref().map(IntakeError::code), Some(IntakeErrorCode::Cancelled)) {
            return;
        }

        if raw.is_empty() {
            match pending_failure {
                None => {
                    // Empty fetch: back to idle without creating a batch.
                    let _ = entry.fsm.lock().apply(SourceEvent::FetchEmpty);
                    self.note_success(entry);
                    self.schedule_next(entry, &config);
                },
                Some(e) => {
                    let _ = entry.fsm.lock().apply(SourceEvent::FetchFail);
                    if e.code() == IntakeErrorCode::NotConnected {
                        entry.runtime.lock().needs_reconnect = true;
                    }
                    self.apply_failure_policy(entry, &e);
                },
            }
            return;
        }

        let _ = entry.fsm.lock().apply(SourceEvent::FetchOk);
        let stored = self
            .process_and_store(entry, &config, raw, &cancel)
            .await;

        match stored {
            StoreOutcome::Stopped => {},
            StoreOutcome::Failed => {
                // process_and_store already applied the failure policy; the
                // cursor stays put so the work replays.
            },
            StoreOutcome::Stored => {
                // Persist the resume position: SQL keeps its watermark; page
                // cursors clear once the walk finished.
                let saved_cursor = if terminal && config.source_type != SourceType::Sql {
                    None
                } else {
                    cursor.clone()
                };
                if let Err(e) = self
                    .inner
                    .storage
                    .save_cursor(&source_id, saved_cursor.as_deref())
                    .await
                {
                    warn!(%source_id, error = %e, "cursor save failed");
                }

                match pending_failure {
                    None => {
                        self.note_success(entry);
                        self.schedule_next(entry, &config);
                    },
                    Some(e) => {
                        // Progress is stored; the failed page drives the
                        // backoff and is retried from the saved cursor.
                        let mut fsm = entry.fsm.lock();
                        let _ = fsm.apply(SourceEvent::Tick);
                        let _ = fsm.apply(SourceEvent::FetchFail);
                        drop(fsm);
                        if e.code() == IntakeErrorCode::NotConnected {
                            entry.runtime.lock().needs_reconnect = true;
                        }
                        self.apply_failure_policy(entry, &e);
                    },
                }
            },
        }
        self.inner.metrics.end_to_end_timed(&source_id, cycle_start.elapsed());
    }

    async fn run_ingest(&self, entry: &Arc<SourceEntry>, records: Vec<RawRecord>) {
        let config = entry.config.read().clone();
        let cancel = entry.cancel.lock().clone();
        let cycle_start = Instant::now();

        {
            let mut fsm = entry.fsm.lock();
            if fsm.apply(SourceEvent::Tick).is_err() {
                warn!(source_id = %config.source_id, "pushed records while not idle; dropped");
                return;
            }
            let _ = fsm.apply(SourceEvent::FetchOk);
        }
        let outcome = self.process_and_store(entry, &config, records, &cancel).await;
        if matches!(outcome, StoreOutcome::Stored) {
            self.note_success(entry);
        }
        self.inner
            .metrics
            .end_to_end_timed(&config.source_id, cycle_start.elapsed());
    }

    /// Pipeline plus storage for one batch of raw records. FSM is expected
    /// to be in `Processing` on entry.
    async fn process_and_store(
        &self,
        entry: &Arc<SourceEntry>,
        config: &SourceConfig,
        raw: Vec<RawRecord>,
        cancel: &CancellationToken,
    ) -> StoreOutcome {
        let source_id = config.source_id.clone();
        self.inner.metrics.batch_started(&source_id);

        let attempted = raw.len() as u64;
        let pipeline_start = Instant::now();
        let outcome = match self.inner.pipeline.process_batch(raw, config, cancel).await {
            Ok(outcome) => outcome,
            Err(e) if e.code() == IntakeErrorCode::Cancelled => return StoreOutcome::Stopped,
            Err(e) => {
                let _ = entry.fsm.lock().apply(SourceEvent::ProcessFail);
                self.inner.metrics.batch_failed(&source_id);
                self.apply_failure_policy(entry, &e);
                return StoreOutcome::Failed;
            },
        };
        self.inner.metrics.pipeline_timed(&source_id, pipeline_start.elapsed());
        let _ = entry.fsm.lock().apply(SourceEvent::ProcessOk);

        self.inner.metrics.records_rejected(&source_id, outcome.rejected.len() as u64);
        self.inner.metrics.records_duplicated(&source_id, outcome.duplicates);

        let accepted_hashes: Vec<String> = outcome
            .accepted
            .iter()
            .map(|r| r.content_hash.clone())
            .collect();
        let accepted_count = outcome.accepted.len() as u64;
        let rejected_count = outcome.rejected.len() as u64;

        let mut records = outcome.accepted;
        if config.audit_rejected {
            records.extend(outcome.rejected);
        }

        if records.is_empty() {
            // Nothing left to store (all duplicates, or rejects without
            // audit); the cycle still succeeded.
            let _ = entry.fsm.lock().apply(SourceEvent::StoreOk);
            self.inner.metrics.batch_succeeded(&source_id);
            return StoreOutcome::Stored;
        }

        let mut batch = IngestionBatch::new(source_id.clone(), records);
        batch.stats.attempted = attempted;
        batch.stats.duplicated = outcome.duplicates;
        batch.stats.rejected = rejected_count;
        batch.set_status(intake_core::BatchStatus::Processing);

        let storage_start = Instant::now();
        let op = match self
            .inner
            .storage
            .store_batch(&batch, &config.storage_table)
            .await
        {
            Ok(op) => op,
            Err(e) => {
                let _ = entry.fsm.lock().apply(SourceEvent::StoreFail);
                self.inner.metrics.batch_failed(&source_id);
                self.apply_failure_policy(entry, &e);
                return StoreOutcome::Failed;
            },
        };
        self.inner.metrics.storage_timed(&source_id, storage_start.elapsed());

        match op.status {
            intake_core::BatchStatus::Completed => {
                let _ = entry.fsm.lock().apply(SourceEvent::StoreOk);
                self.inner.metrics.batch_succeeded(&source_id);
                self.inner.metrics.records_processed(&source_id, accepted_count);
                for hash in &accepted_hashes {
                    if let Err(e) = self.inner.duplicates.remember(&source_id, hash).await {
                        debug!(%source_id, error = %e, "duplicate mark failed");
                    }
                }
                StoreOutcome::Stored
            },
            status => {
                // Partial or failed: persisted rows stay, the remainder is
                // re-fetched and re-upserted on the next tick.
                let failure = op.failure.clone().unwrap_or(IntakeError::Database {
                    message:   format!("storage operation ended {status}"),
                    sql_state: None,
                });
                if status == intake_core::BatchStatus::Partial {
                    self.inner.metrics.batch_partial(&source_id);
                    self.inner
                        .metrics
                        .records_processed(&source_id, op.succeeded);
                } else {
                    self.inner.metrics.batch_failed(&source_id);
                }
                let _ = entry.fsm.lock().apply(SourceEvent::StoreFail);
                self.apply_failure_policy(entry, &failure);
                StoreOutcome::Failed
            },
        }
    }

    /// Classify a failure and set up backoff/breaker state. The FSM is
    /// already in `Backoff` when this runs.
    fn apply_failure_policy(&self, entry: &Arc<SourceEntry>, error: &IntakeError) {
        let config = entry.config.read().clone();
        let source_id = &config.source_id;
        self.inner.metrics.error(source_id, error.code().as_str());

        match error.class() {
            ErrorClass::Permanent => {
                error!(%source_id, error = %error, "permanent failure, breaker tripped");
                entry.breaker.lock().trip_permanent();
                entry.runtime.lock().backoff_until = Some(Instant::now());
            },
            ErrorClass::Internal => {
                let mut runtime = entry.runtime.lock();
                runtime.internal_streak += 1;
                let streak = runtime.internal_streak;
                drop(runtime);
                // One retry for an internal error; a repeat opens the
                // breaker rather than poisoning the source.
                if streak >= 2 {
                    error!(%source_id, error = %error, "repeated internal failure, breaker tripped");
                    entry.breaker.lock().trip_permanent();
                    entry.runtime.lock().backoff_until = Some(Instant::now());
                } else {
                    warn!(%source_id, error = %error, "internal failure, retrying once");
                    let state = entry.breaker.lock().record_failure();
                    self.arm_backoff(entry, &config, error);
                    debug!(%source_id, breaker = %state, "backoff armed");
                }
            },
            ErrorClass::Transient => {
                let (state, failures) = {
                    let mut breaker = entry.breaker.lock();
                    let state = breaker.record_failure();
                    // Retry budget exhausted: stop retrying until a cooldown
                    // passes, even below the breaker threshold.
                    if breaker.consecutive_failures() >= config.retry.max_attempts.max(1) {
                        breaker.force_open();
                    }
                    (state, breaker.consecutive_failures())
                };
                self.arm_backoff(entry, &config, error);
                warn!(
                    %source_id,
                    error = %error,
                    breaker = %state,
                    failures,
                    "transient failure, backing off"
                );
            },
        }
    }

    fn arm_backoff(&self, entry: &Arc<SourceEntry>, config: &SourceConfig, error: &IntakeError) {
        let attempt = entry.breaker.lock().consecutive_failures().max(1);
        let mut delay = backoff_delay(&config.retry, attempt);
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint);
        }
        entry.runtime.lock().backoff_until = Some(Instant::now() + delay);
    }

    fn note_success(&self, entry: &Arc<SourceEntry>) {
        entry.breaker.lock().record_success();
        let mut runtime = entry.runtime.lock();
        runtime.backoff_until = None;
        runtime.internal_streak = 0;
    }

    fn schedule_next(&self, entry: &Arc<SourceEntry>, config: &SourceConfig) {
        if config.mode == IngestionMode::Scheduled {
            let mut runtime = entry.runtime.lock();
            runtime.next_fetch_at =
                next_fetch_at(&config.schedule, runtime.last_fetch_at, Utc::now()).ok();
        }
    }

    async fn finalize_stop(&self, entry: &Arc<SourceEntry>) {
        if let Some(mut adapter) = entry.adapter.lock().await.take() {
            adapter.disconnect().await;
        }
        let _ = entry.fsm.lock().apply(SourceEvent::Stop);
        {
            let mut runtime = entry.runtime.lock();
            *runtime = SourceRuntime::default();
        }
        *entry.cancel.lock() = CancellationToken::new();
        self.persist_state(entry, None).await;
        debug!(source_id = %entry.config.read().source_id, "source stopped");
    }

    async fn persist_state(&self, entry: &SourceEntry, paused_at: Option<DateTime<Utc>>) {
        let config = entry.config.read().clone();
        let phase = entry.phase();
        if let Err(e) = self
            .inner
            .storage
            .upsert_source_row(&config, phase.as_str(), paused_at)
            .await
        {
            warn!(source_id = %config.source_id, error = %e, "state persistence failed");
        }
    }
}

enum StoreOutcome {
    Stored,
    Failed,
    Stopped,
}
