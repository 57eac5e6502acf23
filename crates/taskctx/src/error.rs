//! Error types for taskctx
//!
//! Errors fall into three groups:
//! - slot misuse ([`ContextError`]), reported to the caller immediately
//! - per-task terminal errors ([`TaskError`]), captured in the task's result
//! - scheduler-level misuse ([`SchedulerError`]), returned by the scheduler API

use crate::state_machine::TaskState;
use crate::types::TaskId;
use std::path::PathBuf;

/// Errors raised by context slot declaration and access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A slot with the same name was already declared in this process
    #[error("context slot `{name}` is already declared")]
    DuplicateSlot { name: String },

    /// A slot or suspension point was used while no task was executing
    #[error("{what} used outside of a running task")]
    NoActiveContext { what: String },
}

impl ContextError {
    pub(crate) fn no_active(what: impl Into<String>) -> Self {
        Self::NoActiveContext { what: what.into() }
    }
}

/// Terminal failure of a single task.
///
/// Never propagated to sibling tasks or to the scheduler loop.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled before it completed
    #[error("task cancelled")]
    Cancelled,

    /// The entry future returned an error
    #[error("task failed: {0:#}")]
    Failed(anyhow::Error),

    /// The entry future panicked while being polled
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task waited on a signal that no remaining task could raise
    #[error("task stalled: no runnable task can satisfy its wake condition")]
    Stalled,
}

impl TaskError {
    /// Check if the task ended through cancellation
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if the task's own logic failed (error or panic)
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_))
    }
}

/// Result recorded for each finished task.
pub type TaskResult<T> = Result<T, TaskError>;

/// Errors returned by the scheduler API itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The handle was issued by a different scheduler
    #[error("{task} belongs to a different scheduler")]
    ForeignHandle { task: TaskId },

    /// No task with this id was ever spawned here
    #[error("{task} is unknown to this scheduler")]
    UnknownTask { task: TaskId },

    /// The task's outcome was already returned by an earlier run
    #[error("outcome of {task} was already collected")]
    AlreadyCollected { task: TaskId },

    /// The configured step budget ran out before the run finished
    #[error("step limit of {steps} exceeded")]
    StepLimitExceeded { steps: u64 },
}

/// Task lifecycle violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StateMachineError {
    /// The transition is not in the allowed matrix
    #[error("illegal task state transition {from:?} -> {to:?}")]
    IllegalTransition { from: TaskState, to: TaskState },
}

/// Event log errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LogError {
    /// The hash chain is broken at the given event
    #[error("event log integrity violated at event {index}")]
    IntegrityViolation { index: usize },
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration is not valid TOML for [`SchedulerConfig`](crate::SchedulerConfig)
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
