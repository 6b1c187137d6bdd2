//! Error types for Warden core operations.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! No silent failures, no ignored errors.

use thiserror::Error;

/// The result type for Warden core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while validating specs or reading delivery metadata.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A specification field failed validation.
    #[error("invalid {field}: {reason}")]
    InvalidSpec {
        /// The offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A subject pattern is malformed.
    #[error("invalid subject '{subject}': {reason}")]
    InvalidSubject {
        /// The subject as given.
        subject: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The message was not delivered through a durable cursor.
    #[error("message has no cursor acknowledgment subject")]
    NotCursorMessage,

    /// The acknowledgment subject does not have the expected envelope.
    #[error("malformed acknowledgment subject '{subject}': {reason}")]
    MalformedAckSubject {
        /// The reply subject as received.
        subject: String,
        /// Which part could not be read.
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidSpec {
            field: "replicas",
            reason: "must be at least 1".to_string(),
        };
        assert_eq!(err.to_string(), "invalid replicas: must be at least 1");

        let err = CoreError::MalformedAckSubject {
            subject: "$JS.ACK.x".to_string(),
            reason: "too few tokens",
        };
        let msg = err.to_string();
        assert!(msg.contains("$JS.ACK.x"));
        assert!(msg.contains("too few tokens"));
    }
}
