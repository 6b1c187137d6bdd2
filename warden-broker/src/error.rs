//! Broker error types.
//!
//! This module defines the error types returned by every broker backend.
//! "Not found" is its own variant so the reconciler can tell absence apart
//! from failure.

use thiserror::Error;
use warden_core::CoreError;

use crate::message::AckKind;

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors that can occur while talking to the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The named stream does not exist.
    #[error("stream not found: {stream}")]
    StreamNotFound {
        /// The stream name.
        stream: String,
    },

    /// The named durable cursor does not exist on the stream.
    #[error("cursor not found: {stream}/{cursor}")]
    CursorNotFound {
        /// The stream name.
        stream: String,
        /// The durable cursor name.
        cursor: String,
    },

    /// The transport could not connect.
    #[error("connect to {address} failed: {message}")]
    Connect {
        /// The broker address.
        address: String,
        /// Error message.
        message: String,
    },

    /// A management or fetch request failed.
    #[error("{operation} failed: {message}")]
    Request {
        /// What operation was being performed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// An acknowledgment could not be delivered.
    #[error("{kind} failed: {message}")]
    Ack {
        /// The acknowledgment that was attempted.
        kind: AckKind,
        /// Error message.
        message: String,
    },

    /// The link has been closed.
    #[error("link closed")]
    Closed,

    /// Delivery metadata could not be read.
    #[error(transparent)]
    Metadata(#[from] CoreError),
}

impl BrokerError {
    /// Returns true if this error means the looked-up entity is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::StreamNotFound { .. } | Self::CursorNotFound { .. })
    }
}
