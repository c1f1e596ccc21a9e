//! Per-source circuit breaker.
//!
//! Opens after a configured number of consecutive failures, or immediately
//! on a permanent error. While open, the scheduler suppresses ticks; when
//! the cooldown expires, a single probe tick is admitted (half-open). A
//! successful probe closes the breaker; a failed probe reopens it with the
//! cooldown doubled, capped at 16x. Permanent trips use the longer
//! `probe_after_ms` cooldown since they need operator attention.

use std::time::{Duration, Instant};

use intake_core::config::BreakerConfig;
use serde::Serialize;

/// Cooldown growth cap: doubled per reopen up to 16x the configured value.
const MAX_COOLDOWN_MULTIPLIER: u32 = 16;

/// Breaker state as surfaced through health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Normal operation
    Closed,
    /// Ticks suppressed until the cooldown expires
    Open,
    /// One probe tick is in flight
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config:               BreakerConfig,
    state:                BreakerState,
    consecutive_failures: u32,
    opened_at:            Option<Instant>,
    reopen_count:         u32,
    permanent:            bool,
}

impl CircuitBreaker {
    /// A closed breaker with the given configuration.
    #[must_use]
    pub const fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            reopen_count: 0,
            permanent: false,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BreakerState {
        self.state
    }

    /// Consecutive failures seen since the last success.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn cooldown(&self) -> Duration {
        if self.permanent {
            return Duration::from_millis(self.config.probe_after_ms);
        }
        let multiplier = 2_u64
            .saturating_pow(self.reopen_count)
            .min(u64::from(MAX_COOLDOWN_MULTIPLIER));
        Duration::from_millis(self.config.open_cooldown_ms.saturating_mul(multiplier))
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
    }

    /// Whether the scheduler may tick this source now. The transition from
    /// open to half-open happens here: the call that observes an expired
    /// cooldown is granted the single probe.
    pub fn allow_tick(&mut self) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let expired = self
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.cooldown());
                if expired {
                    self.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            },
            // The probe is in flight; wait for its verdict.
            BreakerState::HalfOpen => false,
        }
    }

    /// Record a successful cycle.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.reopen_count = 0;
        self.permanent = false;
        self.opened_at = None;
        self.state = BreakerState::Closed;
    }

    /// Record a failed cycle. Returns the new state.
    pub fn record_failure(&mut self) -> BreakerState {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        match self.state {
            BreakerState::HalfOpen => {
                // Failed probe: reopen with a longer cooldown.
                self.reopen_count = self.reopen_count.saturating_add(1);
                self.open();
            },
            BreakerState::Closed => {
                if self.consecutive_failures >= self.config.failure_threshold {
                    self.open();
                }
            },
            BreakerState::Open => {},
        }
        self.state
    }

    /// Open without the permanent flag: the transient retry budget is
    /// exhausted, so ticks pause for a regular cooldown.
    pub fn force_open(&mut self) {
        if self.state == BreakerState::Closed {
            self.open();
        }
    }

    /// Give back an unused probe admission (the tick could not be
    /// enqueued). The elapsed cooldown re-admits a probe on the next check.
    pub fn cancel_probe(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.state = BreakerState::Open;
        }
    }

    /// Open immediately on a permanent error; only operator action or a
    /// long-cooldown probe recovers.
    pub fn trip_permanent(&mut self) {
        self.permanent = true;
        self.consecutive_failures =
            self.consecutive_failures.max(self.config.failure_threshold);
        self.open();
    }
}
