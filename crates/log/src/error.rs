//! Logging setup errors.

/// Errors raised while installing the logger.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// The level/filter directive could not be parsed.
    #[error("invalid filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Result alias for logging setup.
pub type LogResult<T> = Result<T, LogError>;
