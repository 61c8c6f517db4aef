//! Reconciliation run state machine

use std::fmt;

use kameo_macros::Reply;
use serde::{Deserialize, Serialize};

use crate::desired::SubsystemKind;

/// States of a top-level operation
///
/// `NotStarted → LoadingDesiredState → ConvergingSubsystem* → Done | Failed`.
/// A finished run (`Done`/`Failed`) may start the next operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Reply)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    NotStarted,
    LoadingDesiredState,
    ConvergingSubsystem(SubsystemKind),
    Done,
    Failed,
}

impl RunState {
    /// Check whether a transition to `next` is allowed
    #[must_use]
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::{ConvergingSubsystem, Done, Failed, LoadingDesiredState, NotStarted};

        match (self, next) {
            (NotStarted | Done | Failed, LoadingDesiredState) => true,
            (LoadingDesiredState | ConvergingSubsystem(_), ConvergingSubsystem(_)) => true,
            (LoadingDesiredState | ConvergingSubsystem(_), Done | Failed) => true,
            _ => false,
        }
    }

    /// Whether an operation is currently in flight
    #[must_use]
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            RunState::LoadingDesiredState | RunState::ConvergingSubsystem(_)
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::NotStarted => write!(f, "not_started"),
            RunState::LoadingDesiredState => write!(f, "loading_desired_state"),
            RunState::ConvergingSubsystem(kind) => write!(f, "converging({kind})"),
            RunState::Done => write!(f, "done"),
            RunState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            RunState::NotStarted,
            RunState::LoadingDesiredState,
            RunState::ConvergingSubsystem(SubsystemKind::NetworkAccessPoint),
            RunState::ConvergingSubsystem(SubsystemKind::MessageBroker),
            RunState::Done,
            RunState::LoadingDesiredState,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{} -> {} should be allowed",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_rejected_transitions() {
        assert!(!RunState::NotStarted.can_transition_to(RunState::Done));
        assert!(
            !RunState::Done
                .can_transition_to(RunState::ConvergingSubsystem(SubsystemKind::Dashboard))
        );
        assert!(!RunState::LoadingDesiredState.can_transition_to(RunState::LoadingDesiredState));
    }

    #[test]
    fn test_busy() {
        assert!(RunState::LoadingDesiredState.is_busy());
        assert!(!RunState::Failed.is_busy());
    }
}
