//! Delivery metadata carried in a cursor message's acknowledgment subject.
//!
//! The broker encodes delivery state into the reply subject of every message
//! delivered through a durable cursor:
//!
//! ```text
//! v1: $JS.ACK.<stream>.<cursor>.<delivered>.<sseq>.<cseq>.<ts>.<pending>
//! v2: $JS.ACK.<domain>.<account>.<stream>.<cursor>.<delivered>.<sseq>.<cseq>.<ts>.<pending>.<token>
//! ```
//!
//! A v2 domain of `_` means "no domain".

use chrono::{DateTime, TimeZone, Utc};

use crate::error::{CoreError, CoreResult};
use crate::types::{CursorSequence, StreamSequence};

const ACK_PREFIX: &str = "$JS";
const ACK_KIND: &str = "ACK";
const V1_TOKEN_COUNT: usize = 9;
const V2_TOKEN_COUNT_MIN: usize = 12;
const NO_DOMAIN: &str = "_";

/// Delivery state of one fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// Broker domain, if the subject carries one.
    pub domain: Option<String>,
    /// Stream the message was stored in.
    pub stream: String,
    /// Durable cursor it was delivered through.
    pub cursor: String,
    /// Cumulative delivery count, including this delivery.
    pub delivered: u64,
    /// Position in the stream.
    pub stream_sequence: StreamSequence,
    /// Position on the cursor.
    pub cursor_sequence: CursorSequence,
    /// Broker timestamp of the original publish.
    pub timestamp: DateTime<Utc>,
    /// Broker's estimate of messages still pending on the cursor.
    pub pending: u64,
}

impl DeliveryMetadata {
    /// Parses the metadata from a message's reply subject.
    ///
    /// # Errors
    ///
    /// Returns `NotCursorMessage` if there is no reply subject, and
    /// `MalformedAckSubject` if the subject is not a cursor acknowledgment
    /// subject or a numeric field does not parse.
    pub fn parse(reply: Option<&str>) -> CoreResult<Self> {
        let reply = reply.ok_or(CoreError::NotCursorMessage)?;
        let malformed = |reason| CoreError::MalformedAckSubject {
            subject: reply.to_string(),
            reason,
        };

        let mut tokens: Vec<&str> = reply.split('.').collect();
        if tokens.len() < V1_TOKEN_COUNT || tokens[0] != ACK_PREFIX || tokens[1] != ACK_KIND {
            return Err(malformed("not a cursor acknowledgment subject"));
        }
        if tokens.len() == V1_TOKEN_COUNT {
            // Normalize v1 to the v2 layout with an empty domain and account.
            tokens.insert(2, "");
            tokens.insert(3, "");
        } else if tokens.len() < V2_TOKEN_COUNT_MIN {
            return Err(malformed("unexpected token count"));
        }

        let number = |index: usize, reason: &'static str| {
            tokens[index].parse::<u64>().map_err(|_| malformed(reason))
        };

        let domain = match tokens[2] {
            "" | NO_DOMAIN => None,
            domain => Some(domain.to_string()),
        };
        let delivered = number(6, "delivery count is not a number")?;
        let stream_sequence = StreamSequence::new(number(7, "stream sequence is not a number")?);
        let cursor_sequence = CursorSequence::new(number(8, "cursor sequence is not a number")?);
        let nanos = tokens[9]
            .parse::<i64>()
            .map_err(|_| malformed("timestamp is not a number"))?;
        let pending = number(10, "pending count is not a number")?;

        Ok(Self {
            domain,
            stream: tokens[4].to_string(),
            cursor: tokens[5].to_string(),
            delivered,
            stream_sequence,
            cursor_sequence,
            timestamp: Utc.timestamp_nanos(nanos),
            pending,
        })
    }

    /// Formats a v1 acknowledgment subject. Used by in-memory brokers that
    /// must produce subjects a real client would parse.
    #[must_use]
    pub fn format_v1_reply(
        stream: &str,
        cursor: &str,
        delivered: u64,
        stream_sequence: StreamSequence,
        cursor_sequence: CursorSequence,
        timestamp: DateTime<Utc>,
        pending: u64,
    ) -> String {
        format!(
            "{ACK_PREFIX}.{ACK_KIND}.{stream}.{cursor}.{delivered}.{}.{}.{}.{pending}",
            stream_sequence.get(),
            cursor_sequence.get(),
            timestamp.timestamp_nanos_opt().unwrap_or_default(),
        )
    }
}
