//! Error types for port operations.
//!
//! Every port method returns `Result<_, PortsError>`. Drivers map their
//! internal errors into these variants so the engine can classify failures
//! without knowing the concrete backend.

use std::time::Duration;

/// Failure of a collaborator call.
///
/// [`is_retryable`](Self::is_retryable) separates transient agent trouble
/// from permanent errors; keyword calls report it in their error details.
#[derive(Debug, thiserror::Error)]
pub enum PortsError {
    /// A plan, keyword, data pool or report node does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What was looked up, e.g. `plan` or `function`.
        entity: String,
        /// Identifier that was looked up.
        id: String,
    },

    /// An expression could not be parsed or evaluated.
    #[error("expression `{expression}`: {message}")]
    Expression {
        /// The offending expression.
        expression: String,
        /// What went wrong.
        message: String,
    },

    /// No agent token matched the selection criteria.
    #[error("no token available for {criteria}")]
    TokenUnavailable {
        /// Rendered selection criteria.
        criteria: String,
    },

    /// Backend connection failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Operation exceeded its timeout.
    #[error("timeout: {operation} after {duration:?}")]
    Timeout {
        /// Name of the operation that timed out.
        operation: String,
        /// How long was waited before giving up.
        duration: Duration,
    },

    /// Catch-all internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PortsError {
    /// Convenience constructor for [`PortsError::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Convenience constructor for [`PortsError::Expression`].
    pub fn expression(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`PortsError::Timeout`].
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Returns `true` for transient errors a caller may retry.
    ///
    /// Currently [`Connection`](Self::Connection), [`Timeout`](Self::Timeout)
    /// and [`TokenUnavailable`](Self::TokenUnavailable).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout { .. } | Self::TokenUnavailable { .. }
        )
    }
}

impl From<serde_json::Error> for PortsError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn constructors_fill_the_fields() {
        let err = PortsError::timeout("call CreateOrder", Duration::from_millis(250));
        assert!(matches!(
            &err,
            PortsError::Timeout { operation, duration }
                if operation == "call CreateOrder" && *duration == Duration::from_millis(250)
        ));
        assert_eq!(err.to_string(), "timeout: call CreateOrder after 250ms");
        assert!(matches!(
            PortsError::not_found("plan", "login"),
            PortsError::NotFound { entity, id } if entity == "plan" && id == "login"
        ));
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(PortsError::Connection("refused".into()).is_retryable());
        assert!(PortsError::timeout("op", Duration::from_secs(1)).is_retryable());
        assert!(
            PortsError::TokenUnavailable {
                criteria: "os=linux".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!PortsError::not_found("X", "1").is_retryable());
        assert!(!PortsError::expression("a +", "unexpected end").is_retryable());
        assert!(!PortsError::Serialization("bad json".into()).is_retryable());
        assert!(!PortsError::Internal("oops".into()).is_retryable());
    }

    #[test]
    fn from_serde_json_error() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let ports_err: PortsError = serde_err.into();
        assert!(matches!(ports_err, PortsError::Serialization(msg) if !msg.is_empty()));
    }

    #[test]
    fn display() {
        assert_eq!(
            PortsError::not_found("Plan", "p-1").to_string(),
            "Plan not found: p-1"
        );
        assert_eq!(
            PortsError::expression("a +", "unexpected end").to_string(),
            "expression `a +`: unexpected end"
        );
        assert_eq!(
            PortsError::Internal("something broke".into()).to_string(),
            "internal error: something broke"
        );
    }
}
