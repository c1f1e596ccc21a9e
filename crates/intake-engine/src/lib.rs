//! # Intake Engine
//!
//! The ingestion coordinator: a per-source lifecycle state machine, a
//! scheduler for the four ingestion modes, a bounded worker pool with
//! per-source single-flight, exponential backoff with jitter, and a
//! consecutive-failure circuit breaker. The engine owns control flow
//! end-to-end: sources fetch, the pipeline processes, storage persists,
//! and every step reports to the injected metrics recorder.

pub mod backoff;
pub mod breaker;
pub mod coordinator;
pub mod cron;
pub mod factory;
pub mod fsm;
pub mod schedule;
pub mod testing;

pub use breaker::{BreakerState, CircuitBreaker};
pub use coordinator::{BreakerHealth, EngineConfig, HealthReport, IngestionEngine};
pub use factory::{AdapterFactory, DefaultAdapterFactory};
pub use fsm::{SourceEvent, SourceFsm, SourcePhase};
