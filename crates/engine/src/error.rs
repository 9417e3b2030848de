//! Engine error types.

use arbor_ports::PortsError;

/// Errors from the engine layer.
///
/// Every error that reaches the dispatcher is recorded on the report node as
/// a technical error; none of them stop the run.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No handler is registered for the node kind.
    #[error("no handler registered for kind `{kind}`")]
    HandlerNotFound {
        /// Kind tag that was looked up.
        kind: String,
    },

    /// A node parameter is missing, has the wrong type, or is out of range.
    #[error("invalid parameter `{name}`: {message}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A dynamic parameter failed to evaluate.
    #[error("expression `{expression}` failed: {message}")]
    Expression {
        /// The expression source.
        expression: String,
        /// Evaluator message.
        message: String,
    },

    /// A plan or sub-plan could not be resolved.
    #[error("plan not found: {0}")]
    PlanNotFound(String),

    /// The plan failed validation.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Engine invariant violated.
    #[error("internal error: {0}")]
    Internal(String),

    /// A handler panicked.
    #[error("handler panicked: {0}")]
    Panicked(String),

    /// Error from a collaborator.
    #[error("port error: {0}")]
    Ports(#[from] PortsError),

    /// Error from the execution model.
    #[error("execution error: {0}")]
    Execution(#[from] arbor_execution::ExecutionError),
}

impl EngineError {
    /// Convenience constructor for [`EngineError::HandlerNotFound`].
    pub fn handler_not_found(kind: impl Into<String>) -> Self {
        Self::HandlerNotFound { kind: kind.into() }
    }

    /// Convenience constructor for [`EngineError::InvalidParameter`].
    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`EngineError::Expression`].
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Build a [`EngineError::Panicked`] from a caught panic payload.
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        Self::Panicked(message)
    }

    /// Whether retrying the same operation could succeed.
    ///
    /// Only transient collaborator failures qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Ports(err) if err.is_retryable())
    }
}
