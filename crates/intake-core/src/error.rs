//! Error taxonomy with structured error codes.
//!
//! Every failure in the engine maps to one [`IntakeError`] variant, and every
//! variant maps to a recovery class that drives policy: transient errors are
//! retried with backoff and count toward the circuit breaker, permanent errors
//! open the breaker and wait for operator intervention, internal errors fail
//! the batch without poisoning the source. Record-local failures (validation,
//! compliance) are not errors at this level; they travel inside the record as
//! stage annotations.

use std::time::Duration;

use thiserror::Error;

/// Engine error type with structured error codes.
#[derive(Debug, Error, Clone)]
pub enum IntakeError {
    /// IN001: Transport failed in a way that is expected to heal on its own
    #[error("IN001: transient transport failure: {reason}")]
    TransientTransport {
        /// Detailed failure description
        reason:      String,
        /// Server-suggested delay before the next attempt, when one was sent
        retry_after: Option<Duration>,
    },

    /// IN002: Transport failed in a way retrying cannot fix (auth, 4xx, DNS)
    #[error("IN002: permanent transport failure: {reason}")]
    PermanentTransport {
        /// Detailed failure description
        reason: String,
    },

    /// IN003: A response body or document could not be parsed
    #[error("IN003: parse failure: {reason}")]
    Parse {
        /// What failed to parse and why
        reason: String,
    },

    /// IN004: The remote asked us to slow down
    #[error("IN004: rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Server-suggested delay before the next attempt
        retry_after: Duration,
    },

    /// IN005: Operation attempted on an adapter that has not connected yet
    #[error("IN005: source adapter is not connected")]
    NotConnected,

    /// IN006: The database (or its pool) could not hand out a connection
    #[error("IN006: storage connection unavailable: {reason}")]
    ConnectionUnavailable {
        /// Pool or connection failure description
        reason: String,
    },

    /// IN007: A uniqueness or integrity constraint rejected the write
    #[error("IN007: constraint violation: {reason}")]
    ConstraintViolation {
        /// Constraint and offending value description
        reason: String,
    },

    /// IN008: The declared schema does not match the table we found
    #[error("IN008: schema mismatch: {reason}")]
    SchemaMismatch {
        /// Mismatch description
        reason: String,
    },

    /// IN009: The database aborted the transaction to break a deadlock
    #[error("IN009: deadlock detected: {reason}")]
    Deadlock {
        /// Database-reported context
        reason: String,
    },

    /// IN010: A write referenced a partition that does not exist yet
    #[error("IN010: missing partition {partition} of table {table}")]
    PartitionMissing {
        /// Parent table name
        table:     String,
        /// Child partition name
        partition: String,
    },

    /// IN011: A pipeline stage failed in a way the stage contract forbids
    #[error("IN011: pipeline internal error in {stage}: {reason}")]
    PipelineInternal {
        /// Stage that failed
        stage:  String,
        /// Failure description
        reason: String,
    },

    /// IN012: A lifecycle event arrived in a state that cannot accept it
    #[error("IN012: invalid transition: {event} while {from}")]
    FsmInvalidTransition {
        /// State the source was in
        from:  String,
        /// Event that was rejected
        event: String,
    },

    /// IN013: The named source is not registered
    #[error("IN013: unknown source: {source_id}")]
    SourceUnknown {
        /// The source id that failed to resolve
        source_id: String,
    },

    /// IN014: The work queue is full and the tick was deferred
    #[error("IN014: work queue saturated")]
    QueueSaturated,

    /// IN015: Registration collided with an existing source
    #[error("IN015: source already exists: {source_id}")]
    AlreadyExists {
        /// The colliding source id
        source_id: String,
    },

    /// IN016: A configuration value is missing, malformed or contradictory
    #[error("IN016: invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong with the configuration
        message: String,
    },

    /// IN017: A database query or transaction failed
    #[error("IN017: database error: {message}")]
    Database {
        /// Driver-reported failure description
        message:   String,
        /// SQLSTATE code when the database reported one
        sql_state: Option<String>,
    },

    /// IN018: JSON (de)serialization failed
    #[error("IN018: serialization error: {reason}")]
    Serialization {
        /// Serde-reported failure description
        reason: String,
    },

    /// IN019: A stop request abandoned the work item at a checkpoint.
    /// Handled by the coordinator; never surfaced across the admin boundary
    /// and never counted toward the breaker.
    #[error("IN019: operation cancelled")]
    Cancelled,
}

/// Recovery class; policy is keyed on this, not on the error's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retry with backoff; counts toward the circuit breaker
    Transient,
    /// No retry; the breaker opens and an operator has to intervene
    Permanent,
    /// Fails the batch once, then opens the breaker if it repeats
    Internal,
}

/// Stable code for each [`IntakeError`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntakeErrorCode {
    /// IN001
    TransientTransport,
    /// IN002
    PermanentTransport,
    /// IN003
    Parse,
    /// IN004
    RateLimited,
    /// IN005
    NotConnected,
    /// IN006
    ConnectionUnavailable,
    /// IN007
    ConstraintViolation,
    /// IN008
    SchemaMismatch,
    /// IN009
    Deadlock,
    /// IN010
    PartitionMissing,
    /// IN011
    PipelineInternal,
    /// IN012
    FsmInvalidTransition,
    /// IN013
    SourceUnknown,
    /// IN014
    QueueSaturated,
    /// IN015
    AlreadyExists,
    /// IN016
    InvalidConfig,
    /// IN017
    Database,
    /// IN018
    Serialization,
    /// IN019
    Cancelled,
}

impl IntakeErrorCode {
    /// Recovery class this code belongs to.
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            IntakeErrorCode::TransientTransport
            | IntakeErrorCode::RateLimited
            | IntakeErrorCode::NotConnected
            | IntakeErrorCode::ConnectionUnavailable
            | IntakeErrorCode::Deadlock
            | IntakeErrorCode::PartitionMissing
            | IntakeErrorCode::QueueSaturated
            | IntakeErrorCode::Database => ErrorClass::Transient,
            IntakeErrorCode::PipelineInternal => ErrorClass::Internal,
            IntakeErrorCode::Cancelled => ErrorClass::Permanent,
            IntakeErrorCode::PermanentTransport
            | IntakeErrorCode::Parse
            | IntakeErrorCode::ConstraintViolation
            | IntakeErrorCode::SchemaMismatch
            | IntakeErrorCode::FsmInvalidTransition
            | IntakeErrorCode::SourceUnknown
            | IntakeErrorCode::AlreadyExists
            | IntakeErrorCode::InvalidConfig
            | IntakeErrorCode::Serialization => ErrorClass::Permanent,
        }
    }

    /// Returns true if errors with this code should be retried.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Short stable label used in metrics and log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            IntakeErrorCode::TransientTransport => "transient_transport",
            IntakeErrorCode::PermanentTransport => "permanent_transport",
            IntakeErrorCode::Parse => "parse",
            IntakeErrorCode::RateLimited => "rate_limited",
            IntakeErrorCode::NotConnected => "not_connected",
            IntakeErrorCode::ConnectionUnavailable => "connection_unavailable",
            IntakeErrorCode::ConstraintViolation => "constraint_violation",
            IntakeErrorCode::SchemaMismatch => "schema_mismatch",
            IntakeErrorCode::Deadlock => "deadlock",
            IntakeErrorCode::PartitionMissing => "partition_missing",
            IntakeErrorCode::PipelineInternal => "pipeline_internal",
            IntakeErrorCode::FsmInvalidTransition => "fsm_invalid_transition",
            IntakeErrorCode::SourceUnknown => "source_unknown",
            IntakeErrorCode::QueueSaturated => "queue_saturated",
            IntakeErrorCode::AlreadyExists => "already_exists",
            IntakeErrorCode::InvalidConfig => "invalid_config",
            IntakeErrorCode::Database => "database",
            IntakeErrorCode::Serialization => "serialization",
            IntakeErrorCode::Cancelled => "cancelled",
        }
    }
}

impl IntakeError {
    /// Get the stable code for this error.
    #[must_use]
    pub const fn code(&self) -> IntakeErrorCode {
        match self {
            IntakeError::TransientTransport { .. } => IntakeErrorCode::TransientTransport,
            IntakeError::PermanentTransport { .. } => IntakeErrorCode::PermanentTransport,
            IntakeError::Parse { .. } => IntakeErrorCode::Parse,
            IntakeError::RateLimited { .. } => IntakeErrorCode::RateLimited,
            IntakeError::NotConnected => IntakeErrorCode::NotConnected,
            IntakeError::ConnectionUnavailable { .. } => IntakeErrorCode::ConnectionUnavailable,
            IntakeError::ConstraintViolation { .. } => IntakeErrorCode::ConstraintViolation,
            IntakeError::SchemaMismatch { .. } => IntakeErrorCode::SchemaMismatch,
            IntakeError::Deadlock { .. } => IntakeErrorCode::Deadlock,
            IntakeError::PartitionMissing { .. } => IntakeErrorCode::PartitionMissing,
            IntakeError::PipelineInternal { .. } => IntakeErrorCode::PipelineInternal,
            IntakeError::FsmInvalidTransition { .. } => IntakeErrorCode::FsmInvalidTransition,
            IntakeError::SourceUnknown { .. } => IntakeErrorCode::SourceUnknown,
            IntakeError::QueueSaturated => IntakeErrorCode::QueueSaturated,
            IntakeError::AlreadyExists { .. } => IntakeErrorCode::AlreadyExists,
            IntakeError::InvalidConfig { .. } => IntakeErrorCode::InvalidConfig,
            IntakeError::Database { .. } => IntakeErrorCode::Database,
            IntakeError::Serialization { .. } => IntakeErrorCode::Serialization,
            IntakeError::Cancelled => IntakeErrorCode::Cancelled,
        }
    }

    /// Recovery class of this error.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.code().class()
    }

    /// Returns true if this error should be retried with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code().is_transient()
    }

    /// Server-suggested retry delay, when the failure carried one.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            IntakeError::TransientTransport { retry_after, .. } => *retry_after,
            IntakeError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, IntakeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes_are_transient() {
        assert!(IntakeErrorCode::TransientTransport.is_transient());
        assert!(IntakeErrorCode::RateLimited.is_transient());
        assert!(IntakeErrorCode::Deadlock.is_transient());
        assert!(IntakeErrorCode::PartitionMissing.is_transient());
        assert!(IntakeErrorCode::Database.is_transient());

        assert!(!IntakeErrorCode::PermanentTransport.is_transient());
        assert!(!IntakeErrorCode::SchemaMismatch.is_transient());
        assert!(!IntakeErrorCode::InvalidConfig.is_transient());
    }

    #[test]
    fn pipeline_errors_are_internal() {
        let err = IntakeError::PipelineInternal {
            stage:  "validation".to_string(),
            reason: "stage contract violated".to_string(),
        };
        assert_eq!(err.class(), ErrorClass::Internal);
        assert!(!err.is_transient());
    }

    #[test]
    fn retry_after_surfaces_from_rate_limit() {
        let err = IntakeError::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = IntakeError::TransientTransport {
            reason:      "HTTP 503".to_string(),
            retry_after: None,
        };
        assert_eq!(err.retry_after(), None);
    }

    #[test]
    fn display_carries_the_code_prefix() {
        let err = IntakeError::SourceUnknown {
            source_id: "sec-filings".to_string(),
        };
        assert_eq!(err.to_string(), "IN013: unknown source: sec-filings");
    }

    #[test]
    fn serde_json_errors_convert() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: IntakeError = bad.expect_err("must fail").into();
        assert_eq!(err.code(), IntakeErrorCode::Serialization);
    }
}
