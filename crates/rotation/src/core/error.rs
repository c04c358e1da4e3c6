/// Validation failures for identifiers and payloads
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Identifier was empty
    #[error("{kind} must not be empty")]
    EmptyId {
        /// Which identifier ("secret id", "request token", ...)
        kind: &'static str,
    },

    /// Identifier failed the length or charset check
    #[error("invalid {kind} '{id}': {reason}")]
    InvalidId {
        /// Which identifier
        kind: &'static str,
        /// The rejected value
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Payload is not an object or lacks a field the consumer needs
    #[error("malformed payload field '{field}': {reason}")]
    MalformedPayload {
        /// Offending field
        field: String,
        /// What was wrong with it
        reason: String,
    },
}
