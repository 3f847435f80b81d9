//! Error taxonomy and process exit codes.
//!
//! Every variant renders with a distinct prefix so post-mortem tooling can
//! classify failures from the log alone.

use crate::id::{EventId, SlotIndex};
use serde::{Deserialize, Serialize};

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Invalid job configuration; carries every problem found
    #[error("ConfigurationError: {}", .errors.join("; "))]
    Configuration {
        /// One rendered message per validation problem
        errors: Vec<String>,
    },

    /// An algorithm returned a failure status or panicked
    #[error("AlgorithmFailure: {alg} failed on event {event}: {reason}")]
    AlgorithmFailure {
        /// Algorithm name
        alg: String,
        /// Event being processed
        event: EventId,
        /// Failure description
        reason: String,
    },

    /// An algorithm read a path that nobody provided
    #[error("DataFaultError: {alg} on event {event}: {path} {reason}")]
    DataFault {
        /// Algorithm name
        alg: String,
        /// Event being processed
        event: EventId,
        /// Offending data path
        path: String,
        /// What went wrong with the path
        reason: String,
    },

    /// The dispatcher made no progress while work remained
    #[error("SchedulerStall: no progress possible; {detail}")]
    SchedulerStall {
        /// Summary of the stalled slots
        detail: String,
    },

    /// Exclusive-resource acquisition order was violated
    #[error("ResourceDeadlock: {resource}: {reason}")]
    ResourceDeadlock {
        /// Resource tag
        resource: String,
        /// Description of the violation
        reason: String,
    },

    /// The watchdog found an event running past the configured timeout
    #[error("TimeoutExceeded: event {event} in {slot} running for {elapsed_ms} ms")]
    TimeoutExceeded {
        /// Event that timed out
        event: EventId,
        /// Slot holding the event
        slot: SlotIndex,
        /// Elapsed wall time in milliseconds
        elapsed_ms: u64,
    },

    /// A cooperative stop was requested from outside
    #[error("ExternalSignal: stop requested")]
    ExternalSignal,

    /// Sub-slot data crossed its isolation boundary
    #[error("IsolationViolation: {path}: {reason}")]
    IsolationViolation {
        /// Offending data path
        path: String,
        /// Description of the violation
        reason: String,
    },

    /// A path was written twice in the same partition
    #[error("DuplicateKey: {path} already present")]
    DuplicateKey {
        /// Offending data path
        path: String,
    },

    /// Not found
    #[error("NotFound: {kind} {id}")]
    NotFound {
        /// What kind of entity was looked up
        kind: String,
        /// Identifier that was looked up
        id: String,
    },

    /// The event source failed
    #[error("SourceError: {reason}")]
    Source {
        /// Description
        reason: String,
    },

    /// The event sink failed
    #[error("SinkError: {reason}")]
    Sink {
        /// Description
        reason: String,
    },

    /// Internal error (for unexpected errors)
    #[error("InternalError: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Build an internal error from anything printable
    #[must_use]
    pub fn internal(message: impl std::fmt::Display) -> Self {
        Self::Internal {
            message: message.to_string(),
        }
    }

    /// Whether the error must terminate the job regardless of error policy
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. }
                | Self::SchedulerStall { .. }
                | Self::ResourceDeadlock { .. }
                | Self::Internal { .. }
        )
    }

    /// Process exit code for this error
    #[must_use]
    pub const fn exit_code(&self, codes: &ExitCodes) -> i32 {
        match self {
            Self::Configuration { .. } => codes.configuration,
            Self::AlgorithmFailure { .. } | Self::DataFault { .. } | Self::IsolationViolation { .. } => {
                codes.algorithm_failure
            }
            Self::SchedulerStall { .. } => codes.stall,
            Self::TimeoutExceeded { .. } => codes.watchdog,
            Self::ExternalSignal => codes.signal,
            _ => codes.other,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            errors: vec![format!("invalid JSON: {}", err)],
        }
    }
}

/// Process exit codes, overridable from the job configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExitCodes {
    /// Clean completion
    pub success: i32,
    /// Configuration error at startup
    pub configuration: i32,
    /// Unrecovered algorithm error under stop-on-error
    pub algorithm_failure: i32,
    /// Scheduler stall
    pub stall: i32,
    /// Watchdog abort
    pub watchdog: i32,
    /// Stopped by an external signal
    pub signal: i32,
    /// Anything else
    pub other: i32,
}

impl Default for ExitCodes {
    fn default() -> Self {
        Self {
            success: 0,
            configuration: 2,
            algorithm_failure: 3,
            stall: 4,
            watchdog: 5,
            signal: 130,
            other: 1,
        }
    }
}
