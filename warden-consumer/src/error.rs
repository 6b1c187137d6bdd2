//! Consumer error types.
//!
//! Following `TigerStyle`: all errors must be handled explicitly.
//! Startup errors are fatal and carry the broker error as their source;
//! loop errors are logged by the engine and never abort it.

use thiserror::Error;
use warden_broker::{AckKind, BrokerError};
use warden_core::{CoreError, SessionGeneration};

/// Result type for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;

/// Errors that can occur in the consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] CoreError),

    /// The transport could not connect.
    #[error("failed to connect to {address}")]
    Connect {
        /// The broker address.
        address: String,
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// A session could not be derived on a fresh connection.
    #[error("failed to derive broker session")]
    Session {
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// The current session could not be re-derived after a reconnect.
    #[error("broker session {generation} is stale: {reason}")]
    StaleSession {
        /// Generation of the stale slot.
        generation: SessionGeneration,
        /// Why re-derivation failed.
        reason: String,
    },

    /// The stream could not be ensured.
    #[error("failed to ensure stream {stream}")]
    EnsureStream {
        /// The stream name.
        stream: String,
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// The durable cursor could not be ensured.
    #[error("failed to ensure cursor {cursor} on stream {stream}")]
    EnsureCursor {
        /// The stream name.
        stream: String,
        /// The durable cursor name.
        cursor: String,
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// The pull subscription could not be opened.
    #[error("failed to subscribe to cursor {cursor} on stream {stream}")]
    Subscribe {
        /// The stream name.
        stream: String,
        /// The durable cursor name.
        cursor: String,
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },

    /// An acknowledgment could not be delivered.
    #[error("failed to {kind} message on {subject}")]
    Acknowledge {
        /// Subject of the message.
        subject: String,
        /// The acknowledgment that was attempted.
        kind: AckKind,
        /// The underlying broker error.
        #[source]
        source: BrokerError,
    },
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_error_carries_source() {
        let err = ConsumerError::EnsureStream {
            stream: "EVENTS".to_string(),
            source: BrokerError::Closed,
        };
        assert_eq!(err.to_string(), "failed to ensure stream EVENTS");
        assert_eq!(err.source().map(ToString::to_string), Some("link closed".to_string()));
    }

    #[test]
    fn test_stale_display() {
        let err = ConsumerError::StaleSession {
            generation: SessionGeneration::new(3),
            reason: "no responders".to_string(),
        };
        assert_eq!(err.to_string(), "broker session gen-3 is stale: no responders");
    }
}
