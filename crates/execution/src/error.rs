//! Execution error types.

use thiserror::Error;

use crate::status::RunStatus;

/// Errors raised by the execution data model.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// A run phase transition is not allowed from the current phase.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        /// Current phase.
        from: RunStatus,
        /// Attempted target phase.
        to: RunStatus,
    },

    /// A serialization or deserialization error.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was aborted.
    #[error("run aborted")]
    Cancelled,
}

impl ExecutionError {
    /// Create an invalid-transition error.
    pub fn invalid_transition(from: RunStatus, to: RunStatus) -> Self {
        Self::InvalidTransition { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn invalid_transition_display() {
        let err = ExecutionError::invalid_transition(RunStatus::Ended, RunStatus::Running);
        assert_eq!(err.to_string(), "invalid transition from ended to running");
    }

    #[test]
    fn from_serde_error() {
        let serde_err = serde_json::from_str::<String>("not valid json").unwrap_err();
        let err = ExecutionError::from(serde_err);
        assert!(err.to_string().starts_with("serialization:"));
    }

    #[test]
    fn cancelled_display() {
        assert_eq!(ExecutionError::Cancelled.to_string(), "run aborted");
    }
}
