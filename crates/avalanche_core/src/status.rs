//! Algorithm return codes, per-slot algorithm states and control-flow decisions.

use serde::{Deserialize, Serialize};

/// Status returned by an algorithm's `execute`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Ran successfully; the filter decision defaults to passed
    Success,
    /// Ran successfully and the event passed the algorithm's filter
    FilterPassed,
    /// Ran successfully and the event failed the algorithm's filter
    FilterFailed,
    /// Failed, but the failure must not stop the job
    Recoverable,
    /// Failed
    Failure,
}

impl StatusCode {
    /// Whether the status counts as a successful execution
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::FilterPassed | Self::FilterFailed)
    }

    /// Terminal algorithm state this status maps to
    #[must_use]
    pub const fn terminal_state(&self) -> AlgState {
        match self {
            Self::Success | Self::FilterPassed => AlgState::EvtAccepted,
            Self::FilterFailed => AlgState::EvtRejected,
            Self::Recoverable | Self::Failure => AlgState::Error,
        }
    }
}

/// Per-slot, per-algorithm execution state
///
/// States only move forward within an event; terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgState {
    /// Nothing known yet
    Initial,
    /// Control flow has not excluded the algorithm
    ControlReady,
    /// Every declared input is present in the effective store
    DataReady,
    /// A task has been submitted
    Scheduled,
    /// Finished with a positive decision
    EvtAccepted,
    /// Finished with a negative decision, or skipped by control flow
    EvtRejected,
    /// Finished with a failure
    Error,
}

impl AlgState {
    /// Whether the state is terminal for the event
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::EvtAccepted | Self::EvtRejected | Self::Error)
    }

    /// Whether `next` is a legal successor of this state
    ///
    /// Skipping (`-> EvtRejected`) is legal from every non-terminal,
    /// non-scheduled state. A scheduled task can only finish.
    #[must_use]
    pub const fn can_transition_to(&self, next: AlgState) -> bool {
        match (self, next) {
            (Self::Initial, Self::ControlReady) => true,
            (Self::ControlReady, Self::DataReady) => true,
            (Self::DataReady, Self::Scheduled) => true,
            (Self::Scheduled, Self::EvtAccepted | Self::EvtRejected | Self::Error) => true,
            (Self::Initial | Self::ControlReady | Self::DataReady, Self::EvtRejected) => true,
            // Conditions producers served by another slot finish without running here
            (Self::Initial | Self::ControlReady | Self::DataReady, Self::EvtAccepted | Self::Error) => {
                true
            }
            _ => false,
        }
    }

    /// Control-flow decision carried by a terminal state
    #[must_use]
    pub const fn decision(&self) -> Decision {
        match self {
            Self::EvtAccepted => Decision::True,
            Self::EvtRejected | Self::Error => Decision::False,
            _ => Decision::Undefined,
        }
    }
}

impl std::fmt::Display for AlgState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "INITIAL",
            Self::ControlReady => "CONTROLREADY",
            Self::DataReady => "DATAREADY",
            Self::Scheduled => "SCHEDULED",
            Self::EvtAccepted => "EVTACCEPTED",
            Self::EvtRejected => "EVTREJECTED",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Tri-state control-flow decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// Not decided yet
    #[default]
    Undefined,
    /// Decided positive
    True,
    /// Decided negative
    False,
}

impl Decision {
    /// Whether a decision has been made
    #[must_use]
    pub const fn is_decided(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    /// Build from a boolean
    #[must_use]
    pub const fn from_bool(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }

    /// Boolean value, `None` while undefined
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Undefined => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }

    /// Logical negation; undefined stays undefined
    #[must_use]
    pub const fn invert(&self) -> Self {
        match self {
            Self::Undefined => Self::Undefined,
            Self::True => Self::False,
            Self::False => Self::True,
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Undefined => "UNDEFINED",
            Self::True => "TRUE",
            Self::False => "FALSE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_terminal_state() {
        assert_eq!(StatusCode::Success.terminal_state(), AlgState::EvtAccepted);
        assert_eq!(StatusCode::FilterPassed.terminal_state(), AlgState::EvtAccepted);
        assert_eq!(StatusCode::FilterFailed.terminal_state(), AlgState::EvtRejected);
        assert_eq!(StatusCode::Recoverable.terminal_state(), AlgState::Error);
        assert_eq!(StatusCode::Failure.terminal_state(), AlgState::Error);
        assert!(StatusCode::FilterFailed.is_success());
        assert!(!StatusCode::Recoverable.is_success());
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [AlgState::EvtAccepted, AlgState::EvtRejected, AlgState::Error] {
            for next in [
                AlgState::Initial,
                AlgState::ControlReady,
                AlgState::DataReady,
                AlgState::Scheduled,
                AlgState::EvtAccepted,
                AlgState::EvtRejected,
                AlgState::Error,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_forward_transitions() {
        assert!(AlgState::Initial.can_transition_to(AlgState::ControlReady));
        assert!(AlgState::ControlReady.can_transition_to(AlgState::DataReady));
        assert!(AlgState::DataReady.can_transition_to(AlgState::Scheduled));
        assert!(AlgState::Scheduled.can_transition_to(AlgState::Error));
        assert!(!AlgState::Scheduled.can_transition_to(AlgState::Initial));
        assert!(!AlgState::DataReady.can_transition_to(AlgState::ControlReady));
    }

    #[test]
    fn test_decision_helpers() {
        assert_eq!(Decision::default(), Decision::Undefined);
        assert_eq!(Decision::True.invert(), Decision::False);
        assert_eq!(Decision::Undefined.invert(), Decision::Undefined);
        assert_eq!(Decision::from_bool(false).as_bool(), Some(false));
        assert_eq!(AlgState::Error.decision(), Decision::False);
        assert_eq!(AlgState::Scheduled.decision(), Decision::Undefined);
    }
}
