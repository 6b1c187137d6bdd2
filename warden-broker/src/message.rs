//! Fetched messages and their acknowledgment channel.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use warden_core::{CoreResult, DeliveryMetadata, Disposition};

use crate::error::BrokerResult;

/// Acknowledgment signal sent back to the broker for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckKind {
    /// Processed; never redeliver.
    Ack,
    /// Not processed; redeliver.
    Nak,
    /// Give up; never redeliver.
    Term,
}

impl AckKind {
    /// Short lowercase name for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Nak => "nak",
            Self::Term => "term",
        }
    }
}

impl fmt::Display for AckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Disposition> for AckKind {
    fn from(disposition: Disposition) -> Self {
        match disposition {
            Disposition::Ack => Self::Ack,
            Disposition::Retry => Self::Nak,
            Disposition::Terminal => Self::Term,
        }
    }
}

/// Acknowledgment channel owned by a single delivery.
///
/// The channel is bound to the link, not the session that fetched the
/// message, so it survives session replacement.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Sends an acknowledgment for the delivery.
    ///
    /// # Errors
    ///
    /// Returns `Ack` if the signal could not be delivered.
    async fn acknowledge(&self, kind: AckKind) -> BrokerResult<()>;
}

/// A message fetched from a pull subscription.
#[derive(Clone)]
pub struct FetchedMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Payload bytes.
    pub payload: Bytes,
    /// Acknowledgment subject, carrying delivery metadata.
    pub reply: Option<String>,
    metadata: CoreResult<DeliveryMetadata>,
    acker: Arc<dyn Acker>,
}

impl FetchedMessage {
    /// Creates a fetched message whose delivery metadata is parsed from the
    /// reply subject.
    #[must_use]
    pub fn new(
        subject: impl Into<String>,
        payload: Bytes,
        reply: Option<String>,
        acker: Arc<dyn Acker>,
    ) -> Self {
        let metadata = DeliveryMetadata::parse(reply.as_deref());
        Self::with_metadata(subject, payload, reply, metadata, acker)
    }

    /// Creates a fetched message with metadata the backend already read.
    #[must_use]
    pub fn with_metadata(
        subject: impl Into<String>,
        payload: Bytes,
        reply: Option<String>,
        metadata: CoreResult<DeliveryMetadata>,
        acker: Arc<dyn Acker>,
    ) -> Self {
        Self {
            subject: subject.into(),
            payload,
            reply,
            metadata,
            acker,
        }
    }

    /// Returns the delivery metadata.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the metadata could not be read.
    pub fn metadata(&self) -> CoreResult<&DeliveryMetadata> {
        self.metadata.as_ref().map_err(Clone::clone)
    }

    /// Sends `kind` on this message's acknowledgment channel.
    ///
    /// # Errors
    ///
    /// Returns `Ack` if the signal could not be delivered.
    pub async fn acknowledge(&self, kind: AckKind) -> BrokerResult<()> {
        self.acker.acknowledge(kind).await
    }

    /// Acknowledges the message.
    ///
    /// # Errors
    ///
    /// Returns `Ack` if the signal could not be delivered.
    pub async fn ack(&self) -> BrokerResult<()> {
        self.acknowledge(AckKind::Ack).await
    }

    /// Requests redelivery.
    ///
    /// # Errors
    ///
    /// Returns `Ack` if the signal could not be delivered.
    pub async fn nak(&self) -> BrokerResult<()> {
        self.acknowledge(AckKind::Nak).await
    }

    /// Terminates redelivery.
    ///
    /// # Errors
    ///
    /// Returns `Ack` if the signal could not be delivered.
    pub async fn term(&self) -> BrokerResult<()> {
        self.acknowledge(AckKind::Term).await
    }
}

impl fmt::Debug for FetchedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedMessage")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("reply", &self.reply)
            .finish_non_exhaustive()
    }
}
