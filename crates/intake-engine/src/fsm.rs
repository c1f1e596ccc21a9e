//! Per-source lifecycle state machine.
//!
//! ```text
//! Registered  --start-->   Connecting
//! Connecting  --ok-->      Idle          --fail-->  Backoff
//! Idle        --tick-->    Fetching
//! Fetching    --ok-->      Processing    --empty--> Idle    --fail--> Backoff
//! Processing  --ok-->      Storing       --fail-->  Backoff
//! Storing     --ok-->      Idle          --fail-->  Backoff
//! Backoff     --expiry-->  Fetching (or Connecting when disconnected)
//! Any         --pause-->   Paused        --resume-> prior state
//! Any         --stop-->    Registered
//! ```

use intake_core::{IntakeError, Result};
use serde::Serialize;

/// Lifecycle phase of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePhase {
    /// Registered but not running
    Registered,
    /// Establishing connectivity
    Connecting,
    /// Waiting for the next tick
    Idle,
    /// Pulling pages from the adapter
    Fetching,
    /// Running the pipeline
    Processing,
    /// Persisting the batch
    Storing,
    /// Waiting out a failure
    Backoff,
    /// Suspended by the operator
    Paused,
}

impl SourcePhase {
    /// Stable string form used in storage, health and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SourcePhase::Registered => "registered",
            SourcePhase::Connecting => "connecting",
            SourcePhase::Idle => "idle",
            SourcePhase::Fetching => "fetching",
            SourcePhase::Processing => "processing",
            SourcePhase::Storing => "storing",
            SourcePhase::Backoff => "backoff",
            SourcePhase::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SourcePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events a source can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEvent {
    /// Operator start
    Start,
    /// Connectivity probe succeeded
    ConnectOk,
    /// Connectivity probe failed
    ConnectFail,
    /// Scheduler tick
    Tick,
    /// Fetch produced records
    FetchOk,
    /// Fetch produced an empty page
    FetchEmpty,
    /// Fetch failed
    FetchFail,
    /// Pipeline succeeded
    ProcessOk,
    /// Pipeline failed
    ProcessFail,
    /// Storage succeeded
    StoreOk,
    /// Storage failed
    StoreFail,
    /// Backoff delay elapsed; reconnect first when disconnected
    BackoffExpired {
        /// Go through Connecting instead of straight to Fetching
        reconnect: bool,
    },
    /// Operator pause
    Pause,
    /// Operator resume
    Resume,
    /// Operator stop
    Stop,
}

impl SourceEvent {
    const fn name(self) -> &'static str {
        match self {
            SourceEvent::Start => "start",
            SourceEvent::ConnectOk => "connect_ok",
            SourceEvent::ConnectFail => "connect_fail",
            SourceEvent::Tick => "tick",
            SourceEvent::FetchOk => "fetch_ok",
            SourceEvent::FetchEmpty => "fetch_empty",
            SourceEvent::FetchFail => "fetch_fail",
            SourceEvent::ProcessOk => "process_ok",
            SourceEvent::ProcessFail => "process_fail",
            SourceEvent::StoreOk => "store_ok",
            SourceEvent::StoreFail => "store_fail",
            SourceEvent::BackoffExpired { .. } => "backoff_expired",
            SourceEvent::Pause => "pause",
            SourceEvent::Resume => "resume",
            SourceEvent::Stop => "stop",
        }
    }
}

/// The state machine: current phase plus the phase a pause interrupted.
#[derive(Debug, Clone, Copy)]
pub struct SourceFsm {
    phase: SourcePhase,
    prior: Option<SourcePhase>,
}

impl SourceFsm {
    /// A freshly registered source.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: SourcePhase::Registered,
            prior: None,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> SourcePhase {
        self.phase
    }

    /// Apply one event, returning the new phase.
    ///
    /// # Errors
    ///
    /// `FsmInvalidTransition` when the current phase cannot accept the
    /// event.
    pub fn apply(&mut self, event: SourceEvent) -> Result<SourcePhase> {
        use SourceEvent as E;
        use SourcePhase as P;

        let next = match (self.phase, event) {
            // Stop is accepted from anywhere and resets the pause memory.
            (_, E::Stop) => {
                self.prior = None;
                Some(P::Registered)
            },
            (P::Paused, E::Resume) => {
                let prior = self.prior.take().unwrap_or(P::Idle);
                Some(prior)
            },
            (P::Paused, _) => None,
            (current, E::Pause) => {
                self.prior = Some(current);
                Some(P::Paused)
            },
            (P::Registered, E::Start) => Some(P::Connecting),
            (P::Connecting, E::ConnectOk) => Some(P::Idle),
            (P::Connecting, E::ConnectFail) => Some(P::Backoff),
            (P::Idle, E::Tick) => Some(P::Fetching),
            (P::Fetching, E::FetchOk) => Some(P::Processing),
            (P::Fetching, E::FetchEmpty) => Some(P::Idle),
            (P::Fetching, E::FetchFail) => Some(P::Backoff),
            (P::Processing, E::ProcessOk) => Some(P::Storing),
            (P::Processing, E::ProcessFail) => Some(P::Backoff),
            (P::Storing, E::StoreOk) => Some(P::Idle),
            (P::Storing, E::StoreFail) => Some(P::Backoff),
            (P::Backoff, E::BackoffExpired { reconnect: true }) => Some(P::Connecting),
            (P::Backoff, E::BackoffExpired { reconnect: false }) => Some(P::Fetching),
            _ => None,
        };

        match next {
            Some(phase) => {
                self.phase = phase;
                Ok(phase)
            },
            None => Err(IntakeError::FsmInvalidTransition {
                from:  self.phase.as_str().to_string(),
                event: event.name().to_string(),
            }),
        }
    }
}

impl Default for SourceFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fsm_at(phase: SourcePhase) -> SourceFsm {
        let mut fsm = SourceFsm::new();
        match phase {
            SourcePhase::Registered => {},
            SourcePhase::Connecting => {
                fsm.apply(SourceEvent::Start).expect("start");
            },
            SourcePhase::Idle => {
                fsm.apply(SourceEvent::Start).expect("start");
                fsm.apply(SourceEvent::ConnectOk).expect("connect");
            },
            other => panic!("unsupported fixture phase: {other}"),
        }
        fsm
    }

    #[test]
    fn happy_path_walks_the_cycle() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        assert_eq!(fsm.apply(SourceEvent::Tick).expect("tick"), SourcePhase::Fetching);
        assert_eq!(fsm.apply(SourceEvent::FetchOk).expect("fetch"), SourcePhase::Processing);
        assert_eq!(fsm.apply(SourceEvent::ProcessOk).expect("process"), SourcePhase::Storing);
        assert_eq!(fsm.apply(SourceEvent::StoreOk).expect("store"), SourcePhase::Idle);
    }

    #[test]
    fn empty_fetch_returns_to_idle() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        fsm.apply(SourceEvent::Tick).expect("tick");
        assert_eq!(fsm.apply(SourceEvent::FetchEmpty).expect("empty"), SourcePhase::Idle);
    }

    #[test]
    fn failures_lead_to_backoff_and_expiry_resumes() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        fsm.apply(SourceEvent::Tick).expect("tick");
        fsm.apply(SourceEvent::FetchFail).expect("fail");
        assert_eq!(fsm.phase(), SourcePhase::Backoff);
        assert_eq!(
            fsm.apply(SourceEvent::BackoffExpired { reconnect: false }).expect("expiry"),
            SourcePhase::Fetching
        );

        fsm.apply(SourceEvent::FetchFail).expect("fail");
        assert_eq!(
            fsm.apply(SourceEvent::BackoffExpired { reconnect: true }).expect("expiry"),
            SourcePhase::Connecting
        );
    }

    #[test]
    fn pause_remembers_and_resume_restores() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        fsm.apply(SourceEvent::Tick).expect("tick");
        assert_eq!(fsm.apply(SourceEvent::Pause).expect("pause"), SourcePhase::Paused);
        assert_eq!(fsm.apply(SourceEvent::Resume).expect("resume"), SourcePhase::Fetching);
    }

    #[test]
    fn stop_returns_to_registered_from_anywhere() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        assert_eq!(fsm.apply(SourceEvent::Stop).expect("stop"), SourcePhase::Registered);

        let mut paused = fsm_at(SourcePhase::Idle);
        paused.apply(SourceEvent::Pause).expect("pause");
        assert_eq!(paused.apply(SourceEvent::Stop).expect("stop"), SourcePhase::Registered);
    }

    #[test]
    fn invalid_transitions_are_typed_errors() {
        let mut fsm = SourceFsm::new();
        let err = fsm.apply(SourceEvent::Tick).expect_err("must refuse");
        assert_eq!(
            err.to_string(),
            "IN012: invalid transition: tick while registered"
        );

        let mut paused = fsm_at(SourcePhase::Idle);
        paused.apply(SourceEvent::Pause).expect("pause");
        assert!(paused.apply(SourceEvent::Tick).is_err());
    }

    #[test]
    fn start_stop_start_returns_to_connecting() {
        let mut fsm = fsm_at(SourcePhase::Idle);
        fsm.apply(SourceEvent::Stop).expect("stop");
        assert_eq!(fsm.apply(SourceEvent::Start).expect("restart"), SourcePhase::Connecting);
    }
}
