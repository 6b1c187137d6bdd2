//! Server error types.

use std::net::SocketAddr;

use warden_consumer::ConsumerError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Command-line arguments are inconsistent.
    #[error("invalid arguments: {message}")]
    InvalidArgs {
        /// What is wrong.
        message: String,
    },

    /// The log subscriber could not be installed.
    #[error("failed to initialize logging: {message}")]
    Logging {
        /// Error message.
        message: String,
    },

    /// The health endpoint could not bind or serve.
    #[error("health endpoint on {addr} failed")]
    Health {
        /// The listen address.
        addr: SocketAddr,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The consumer failed to start.
    #[error(transparent)]
    Consumer(#[from] ConsumerError),
}
