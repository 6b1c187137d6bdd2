//! The dispatch sink: a caller-supplied message handler.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use warden_broker::FetchedMessage;
use warden_core::DeliveryMetadata;

/// Category of a handler failure, logged with the disposition.
///
/// The category does not change the disposition: every failure is retried
/// until the message reaches its maximum delivery count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HandlerErrorKind {
    /// The payload cannot be processed as delivered.
    Payload,
    /// A system the handler depends on is unavailable.
    Downstream,
    /// Any other failure.
    #[default]
    Other,
}

impl HandlerErrorKind {
    /// Short lowercase name for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payload => "payload",
            Self::Downstream => "downstream",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for HandlerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A handler's report that it could not process a message.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct HandlerError {
    kind: HandlerErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    /// Creates a handler error of kind `Other` with the given cause.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(HandlerErrorKind::Other, message)
    }

    /// Creates a handler error of the given kind.
    #[must_use]
    pub fn with_kind(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a `Payload` error.
    #[must_use]
    pub fn payload(message: impl Into<String>) -> Self {
        Self::with_kind(HandlerErrorKind::Payload, message)
    }

    /// Creates a `Downstream` error.
    #[must_use]
    pub fn downstream(message: impl Into<String>) -> Self {
        Self::with_kind(HandlerErrorKind::Downstream, message)
    }

    /// Attaches the underlying error.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the category.
    #[must_use]
    pub const fn kind(&self) -> HandlerErrorKind {
        self.kind
    }

    /// Returns the cause.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Processes one fetched message.
///
/// Returning `Err` asks for a redelivery until the message reaches its
/// maximum delivery count, after which it is terminated. Handlers must be
/// idempotent: delivery is at-least-once.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handles a message.
    async fn handle(
        &self,
        message: &FetchedMessage,
        metadata: &DeliveryMetadata,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    async fn handle(
        &self,
        message: &FetchedMessage,
        metadata: &DeliveryMetadata,
    ) -> Result<(), HandlerError> {
        (**self).handle(message, metadata).await
    }
}

/// Handler backed by a synchronous closure. See [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnHandler<F>(F);

/// Adapts a closure into a [`MessageHandler`].
pub const fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&FetchedMessage, &DeliveryMetadata) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&FetchedMessage, &DeliveryMetadata) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(
        &self,
        message: &FetchedMessage,
        metadata: &DeliveryMetadata,
    ) -> Result<(), HandlerError> {
        (self.0)(message, metadata)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_handler_error_defaults_to_other() {
        let err = HandlerError::new("boom");
        assert_eq!(err.kind(), HandlerErrorKind::Other);
        assert_eq!(err.to_string(), "boom");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_handler_error_keeps_kind_and_source() {
        let parse = parse_error();
        let err = HandlerError::payload("unreadable event").with_source(parse);

        assert_eq!(err.kind(), HandlerErrorKind::Payload);
        assert_eq!(err.kind().to_string(), "payload");
        assert_eq!(err.message(), "unreadable event");
        assert_eq!(
            err.source().map(ToString::to_string),
            Some("expected value at line 1 column 1".to_string())
        );
        assert_eq!(HandlerError::downstream("db down").kind(), HandlerErrorKind::Downstream);
    }

    fn parse_error() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "expected value at line 1 column 1")
    }
}
