//! Error type for logger setup

/// Result type for logger operations
pub type LogResult<T> = Result<T, LogError>;

/// Errors raised while building the subscriber
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Filter directives could not be parsed
    #[error("invalid filter '{filter}': {reason}")]
    Filter {
        /// The directive string as given
        filter: String,
        /// Parser message
        reason: String,
    },

    /// A global subscriber is already installed
    #[error("logger already initialized: {0}")]
    AlreadyInitialized(String),
}
