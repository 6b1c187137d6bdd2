//! Event logger: the audit listener's message handler.
//!
//! Writes one structured log line per message. Payloads that are JSON events
//! are logged field by field; anything else is logged as raw text. The logger
//! never fails a message, so it never causes a redelivery.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;
use warden_broker::FetchedMessage;
use warden_consumer::{HandlerError, MessageHandler};
use warden_core::DeliveryMetadata;

/// How payloads are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum EventLogMode {
    /// Parse the payload as an [`Event`]; fall back to raw.
    #[default]
    Structured,
    /// Log the payload as text without parsing.
    Raw,
    /// Flatten any JSON object's top-level keys; fall back to raw.
    Fields,
}

/// A generic event envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event identifier.
    #[serde(default)]
    pub id: String,
    /// Event type.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Producer of the event.
    #[serde(default)]
    pub source: String,
    /// When the event happened.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// Event body.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

/// What a payload was recognised as.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRecord {
    /// A JSON event.
    Structured(Event),
    /// A JSON object, flattened.
    Fields(Map<String, Value>),
    /// Anything else, as lossy UTF-8.
    Raw(String),
}

/// Interprets a payload according to `mode`.
#[must_use]
pub fn describe(mode: EventLogMode, payload: &[u8]) -> EventRecord {
    let raw = || EventRecord::Raw(String::from_utf8_lossy(payload).into_owned());
    match mode {
        EventLogMode::Structured => serde_json::from_slice::<Event>(payload)
            .map_or_else(|_| raw(), EventRecord::Structured),
        EventLogMode::Fields => serde_json::from_slice::<Map<String, Value>>(payload)
            .map_or_else(|_| raw(), EventRecord::Fields),
        EventLogMode::Raw => raw(),
    }
}

/// Logs every message it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventLogger {
    mode: EventLogMode,
}

impl EventLogger {
    /// Creates an event logger.
    #[must_use]
    pub const fn new(mode: EventLogMode) -> Self {
        Self { mode }
    }

    /// Returns the mode.
    #[must_use]
    pub const fn mode(&self) -> EventLogMode {
        self.mode
    }
}

#[async_trait]
impl MessageHandler for EventLogger {
    async fn handle(
        &self,
        message: &FetchedMessage,
        metadata: &DeliveryMetadata,
    ) -> Result<(), HandlerError> {
        let subject = message.subject.as_str();
        let reply = message.reply.as_deref().unwrap_or_default();
        let data_size = message.payload.len();
        let stream = metadata.stream.as_str();
        let cursor = metadata.cursor.as_str();
        let sequence = metadata.stream_sequence.get();
        let delivered = metadata.delivered;
        let pending = metadata.pending;
        let js_timestamp = rfc3339(metadata.timestamp);

        match describe(self.mode, &message.payload) {
            EventRecord::Structured(event) => {
                let event_data = event
                    .data
                    .as_ref()
                    .map(|d| Value::Object(d.clone()).to_string())
                    .unwrap_or_default();
                info!(
                    subject,
                    reply,
                    data_size,
                    stream,
                    cursor,
                    sequence,
                    delivered,
                    pending,
                    js_timestamp = %js_timestamp,
                    event_id = %event.id,
                    event_type = %event.kind,
                    source = %event.source,
                    event_timestamp = %event.timestamp.map(rfc3339).unwrap_or_default(),
                    event_data = %event_data,
                    "Received structured event"
                );
            }
            EventRecord::Fields(fields) => {
                let fields = Value::Object(fields);
                info!(
                    subject,
                    reply,
                    data_size,
                    stream,
                    cursor,
                    sequence,
                    delivered,
                    pending,
                    js_timestamp = %js_timestamp,
                    fields = %fields,
                    "Received event with custom fields"
                );
            }
            EventRecord::Raw(raw_data) => {
                info!(
                    subject,
                    reply,
                    data_size,
                    stream,
                    cursor,
                    sequence,
                    delivered,
                    pending,
                    js_timestamp = %js_timestamp,
                    raw_data = %raw_data,
                    "Received raw event"
                );
            }
        }
        Ok(())
    }
}

fn rfc3339(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use warden_broker::{AckKind, Acker, BrokerResult};
    use warden_core::{CursorSequence, StreamSequence};

    use super::*;

    struct NoopAcker;

    #[async_trait]
    impl Acker for NoopAcker {
        async fn acknowledge(&self, _kind: AckKind) -> BrokerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_structured_event_is_parsed() {
        let payload = br#"{"id":"evt-1","type":"user.created","source":"accounts","timestamp":"2024-05-01T12:00:00Z","data":{"user":"ada"}}"#;
        let EventRecord::Structured(event) = describe(EventLogMode::Structured, payload) else {
            panic!("expected structured event");
        };
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.kind, "user.created");
        assert_eq!(event.source, "accounts");
        assert_eq!(
            event.timestamp,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
        );
        assert_eq!(event.data.unwrap()["user"], "ada");
    }

    #[test]
    fn test_partial_object_is_still_an_event() {
        let EventRecord::Structured(event) = describe(EventLogMode::Structured, br#"{"id":"x"}"#)
        else {
            panic!("expected structured event");
        };
        assert_eq!(event.id, "x");
        assert!(event.kind.is_empty());
        assert!(event.data.is_none());
    }

    #[test]
    fn test_non_json_falls_back_to_raw() {
        assert_eq!(
            describe(EventLogMode::Structured, b"plain text"),
            EventRecord::Raw("plain text".to_string())
        );
        assert_eq!(
            describe(EventLogMode::Structured, b"[1,2,3]"),
            EventRecord::Raw("[1,2,3]".to_string())
        );
        assert_eq!(
            describe(EventLogMode::Fields, b"42"),
            EventRecord::Raw("42".to_string())
        );
    }

    #[test]
    fn test_raw_mode_never_parses() {
        assert_eq!(
            describe(EventLogMode::Raw, br#"{"id":"x"}"#),
            EventRecord::Raw(r#"{"id":"x"}"#.to_string())
        );
    }

    #[test]
    fn test_fields_mode_flattens_object() {
        let EventRecord::Fields(fields) =
            describe(EventLogMode::Fields, br#"{"order":7,"status":"paid"}"#)
        else {
            panic!("expected fields");
        };
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["order"], 7);
    }

    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn cursor_message(payload: &'static [u8]) -> FetchedMessage {
        let timestamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let reply = DeliveryMetadata::format_v1_reply(
            "EVENTS",
            "events-audit-durable",
            1,
            StreamSequence::new(1),
            CursorSequence::new(1),
            timestamp,
            0,
        );
        FetchedMessage::new(
            "events.test".to_string(),
            Bytes::from_static(payload),
            Some(reply),
            Arc::new(NoopAcker),
        )
    }

    #[tokio::test]
    async fn test_log_line_carries_reply_subject() {
        let captured = CapturedLog::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);
        let message = cursor_message(br#"{"id":"evt-1","type":"user.created"}"#);

        for mode in [EventLogMode::Structured, EventLogMode::Raw, EventLogMode::Fields] {
            EventLogger::new(mode)
                .handle(&message, message.metadata().unwrap())
                .await
                .unwrap();
        }

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let reply = message.reply.as_deref().unwrap();
        assert_eq!(output.lines().count(), 3);
        assert!(
            output
                .lines()
                .all(|line| line.contains("reply=") && line.contains(reply)),
            "{output}"
        );
    }

    #[tokio::test]
    async fn test_handler_never_fails() {
        let message = cursor_message(b"\xff\xfe not utf8");
        let metadata = message.metadata().unwrap();

        for mode in [EventLogMode::Structured, EventLogMode::Raw, EventLogMode::Fields] {
            EventLogger::new(mode).handle(&message, metadata).await.unwrap();
        }
    }
}
