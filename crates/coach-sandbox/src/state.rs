//! Execution lifecycle state machine.
//!
//! ```text
//! received -> validated -> rejected
//!                       -> queued -> executing -> completed | timed_out
//!                                              | resource_exceeded | runtime_error
//! (terminal) -> result_returned
//! ```
//!
//! `not_executed` is reachable from `validated`, `queued` and `executing` when
//! the sandbox runtime cannot be reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::SandboxError;

/// State of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Request accepted.
    #[default]
    Received,
    /// Static validation finished.
    Validated,
    /// Refused because of a critical violation.
    Rejected,
    /// Waiting for a sandbox slot.
    Queued,
    /// Running in a sandbox.
    Executing,
    /// Exited normally.
    Completed,
    /// Killed on wall-clock timeout.
    TimedOut,
    /// Killed on memory or CPU ceiling.
    ResourceExceeded,
    /// Learner code failed.
    RuntimeError,
    /// Runtime unavailable, static analysis only.
    NotExecuted,
    /// Result handed back to the caller.
    ResultReturned,
}

impl ExecutionState {
    /// Returns `true` for outcome states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected
                | Self::Completed
                | Self::TimedOut
                | Self::ResourceExceeded
                | Self::RuntimeError
                | Self::NotExecuted
        )
    }

    /// Returns `true` if `self -> next` is a legal move.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Received => matches!(next, Self::Validated),
            Self::Validated => matches!(next, Self::Rejected | Self::Queued | Self::NotExecuted),
            Self::Queued => matches!(next, Self::Executing | Self::NotExecuted),
            Self::Executing => matches!(
                next,
                Self::Completed
                    | Self::TimedOut
                    | Self::ResourceExceeded
                    | Self::RuntimeError
                    | Self::NotExecuted
            ),
            Self::Rejected
            | Self::Completed
            | Self::TimedOut
            | Self::ResourceExceeded
            | Self::RuntimeError
            | Self::NotExecuted => matches!(next, Self::ResultReturned),
            Self::ResultReturned => false,
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::Queued => "queued",
            Self::Executing => "executing",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::ResourceExceeded => "resource_exceeded",
            Self::RuntimeError => "runtime_error",
            Self::NotExecuted => "not_executed",
            Self::ResultReturned => "result_returned",
        };
        write!(f, "{s}")
    }
}

/// Tracks the current state and when each state was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTracker {
    state: ExecutionState,
    history: Vec<(ExecutionState, DateTime<Utc>)>,
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTracker {
    /// Starts in [`ExecutionState::Received`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ExecutionState::Received,
            history: vec![(ExecutionState::Received, Utc::now())],
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ExecutionState {
        self.state
    }

    /// Every state visited, oldest first.
    #[must_use]
    pub fn history(&self) -> &[(ExecutionState, DateTime<Utc>)] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidTransition`] for an illegal move; the
    /// state is left unchanged.
    pub fn advance(&mut self, next: ExecutionState) -> Result<(), SandboxError> {
        if !self.state.can_transition_to(next) {
            return Err(SandboxError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(from = %self.state, to = %next, "Execution state transition");
        self.state = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }
}
