use crate::error::StateMachineError;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Spawned, never dispatched
    Created,
    /// Being polled
    Running,
    /// Parked at a suspension point or on a foreign waker
    Suspended,
    /// Returned a value
    Completed,
    /// Failed, panicked, was cancelled or stalled
    Failed,
}

impl TaskState {
    /// Whether the task can never run again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Validates a state transition.
///
/// Illegal transitions return an error; with the `strict-debug` feature they
/// panic instead so scheduler bugs surface at the faulting step.
pub fn validate_transition(from: TaskState, to: TaskState) -> Result<(), StateMachineError> {
    if allowed(from, to) {
        Ok(())
    } else {
        #[cfg(feature = "strict-debug")]
        panic!("Illegal task state transition attempted: {from:?} -> {to:?}");

        #[cfg(not(feature = "strict-debug"))]
        Err(StateMachineError::IllegalTransition { from, to })
    }
}

/// States reachable from `from` in one step.
#[must_use]
pub fn allowed_transitions(from: TaskState) -> Vec<TaskState> {
    use TaskState::*;
    match from {
        // Created -> Failed through cancellation or a lost frame
        Created => vec![Running, Failed],
        Running => vec![Suspended, Completed, Failed],
        // Suspended -> Failed through cancellation or a stall
        Suspended => vec![Running, Failed],
        Completed => vec![],
        Failed => vec![],
    }
}

fn allowed(from: TaskState, to: TaskState) -> bool {
    allowed_transitions(from).into_iter().any(|s| s == to)
}
