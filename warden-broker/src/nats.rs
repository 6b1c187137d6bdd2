//! NATS `JetStream` backend.
//!
//! Built on `async-nats`. The client reconnects on its own; this module only
//! translates its connection events into [`LinkEvent`]s and its `JetStream`
//! API into [`Session`] operations.
//!
//! # Example
//!
//! ```ignore
//! use warden_broker::{ConnectOptions, NatsTransport, Transport};
//!
//! let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
//! let link = NatsTransport::new()
//!     .connect("nats://localhost:4222", &ConnectOptions::default(), tx)
//!     .await?;
//! let session = link.derive_session().await?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::connection::State;
use async_nats::jetstream::context::GetStreamErrorKind;
use async_nats::jetstream::{self, consumer, stream, ErrorCode};
use async_nats::{Client, Event};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};
use chrono::{TimeZone, Utc};
use warden_core::{
    CoreError, CoreResult, CursorSequence, DeliverPolicy, DeliveryMetadata, DiscardPolicy,
    ReplayPolicy, RetentionLimits, RetentionPolicy, StorageClass, StreamSequence, StreamSpec,
};

use crate::error::{BrokerError, BrokerResult};
use crate::info::{CursorConfig, CursorInfo, StreamInfo, StreamState};
use crate::message::{AckKind, Acker, FetchedMessage};
use crate::session::{
    ConnectOptions, FetchRequest, Link, LinkEvent, LinkEventSender, PullSubscription, Session,
    Transport,
};

// -----------------------------------------------------------------------------
// Transport
// -----------------------------------------------------------------------------

/// Transport that connects to a NATS server with `JetStream` enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsTransport;

impl NatsTransport {
    /// Creates a NATS transport.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for NatsTransport {
    async fn connect(
        &self,
        address: &str,
        options: &ConnectOptions,
        events: LinkEventSender,
    ) -> BrokerResult<Arc<dyn Link>> {
        let lost = Arc::new(AtomicBool::new(false));
        let closed = Arc::new(AtomicBool::new(false));
        let callback_closed = Arc::clone(&closed);
        let callback_events = events.clone();

        let client = async_nats::ConnectOptions::new()
            .name(&options.name)
            .connection_timeout(options.connect_timeout)
            .event_callback(move |event| {
                let events = callback_events.clone();
                let lost = Arc::clone(&lost);
                let closed = Arc::clone(&callback_closed);
                async move {
                    if let Some(event) = translate_event(event, &lost, &closed) {
                        let _ = events.send(event);
                    }
                }
            })
            .connect(address)
            .await
            .map_err(|e| BrokerError::Connect {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        Ok(Arc::new(NatsLink {
            address: address.to_string(),
            client,
            closed,
            events,
        }))
    }
}

/// Maps a client event to a link event. A `Connected` that follows a
/// `Disconnected` is a reconnect. `Closed` is reported once per link,
/// whether the client or [`Link::close`] closed it first.
fn translate_event(event: Event, lost: &AtomicBool, closed: &AtomicBool) -> Option<LinkEvent> {
    match event {
        Event::Connected => {
            if lost.swap(false, Ordering::AcqRel) {
                Some(LinkEvent::Reconnected)
            } else {
                Some(LinkEvent::Connected)
            }
        }
        Event::Disconnected => {
            lost.store(true, Ordering::Release);
            Some(LinkEvent::Disconnected)
        }
        Event::Closed => {
            if closed.swap(true, Ordering::AcqRel) {
                None
            } else {
                Some(LinkEvent::Closed)
            }
        }
        Event::ServerError(err) => Some(LinkEvent::Error {
            message: err.to_string(),
        }),
        Event::ClientError(err) => Some(LinkEvent::Error {
            message: err.to_string(),
        }),
        other => {
            debug!(event = ?other, "NATS client event");
            None
        }
    }
}

// -----------------------------------------------------------------------------
// Link
// -----------------------------------------------------------------------------

struct NatsLink {
    address: String,
    client: Client,
    closed: Arc<AtomicBool>,
    events: LinkEventSender,
}

#[async_trait]
impl Link for NatsLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.client.connection_state() == State::Connected
    }

    async fn derive_session(&self) -> BrokerResult<Arc<dyn Session>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        Ok(Arc::new(NatsSession {
            context: jetstream::new(self.client.clone()),
        }))
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Drain flushes pending acknowledgments, then closes the connection
        // for every clone of the client.
        if let Err(e) = self.client.drain().await {
            warn!(address = %self.address, error = %e, "Drain on close failed");
        }
        let _ = self.events.send(LinkEvent::Closed);
    }
}

// -----------------------------------------------------------------------------
// Session
// -----------------------------------------------------------------------------

struct NatsSession {
    context: jetstream::Context,
}

impl NatsSession {
    async fn stream(&self, name: &str) -> BrokerResult<stream::Stream> {
        self.context.get_stream(name).await.map_err(|e| match e.kind() {
            GetStreamErrorKind::JetStream(js) if js.error_code() == ErrorCode::STREAM_NOT_FOUND => {
                BrokerError::StreamNotFound {
                    stream: name.to_string(),
                }
            }
            _ => request_error("stream lookup", &e),
        })
    }
}

#[async_trait]
impl Session for NatsSession {
    async fn stream_info(&self, stream: &str) -> BrokerResult<StreamInfo> {
        let handle = self.stream(stream).await?;
        Ok(stream_info(handle.cached_info()))
    }

    async fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        let handle = self
            .context
            .create_stream(stream_config(spec))
            .await
            .map_err(|e| request_error("stream create", &e))?;
        Ok(stream_info(handle.cached_info()))
    }

    async fn update_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        let info = self
            .context
            .update_stream(&stream_config(spec))
            .await
            .map_err(|e| request_error("stream update", &e))?;
        Ok(stream_info(&info))
    }

    async fn delete_stream(&self, stream: &str) -> BrokerResult<()> {
        self.context
            .delete_stream(stream)
            .await
            .map_err(|e| request_error("stream delete", &e))?;
        Ok(())
    }

    async fn cursor_info(&self, stream: &str, durable: &str) -> BrokerResult<CursorInfo> {
        let handle = self.stream(stream).await?;
        let cursor = handle
            .get_consumer::<consumer::Config>(durable)
            .await
            .map_err(|e| consumer_error("cursor lookup", stream, durable, &e))?;
        Ok(cursor_info(cursor.cached_info()))
    }

    async fn create_cursor(
        &self,
        stream: &str,
        config: &CursorConfig,
    ) -> BrokerResult<CursorInfo> {
        let handle = self.stream(stream).await?;
        let cursor = handle
            .create_consumer(consumer_config(config))
            .await
            .map_err(|e| request_error("cursor create", &e))?;
        Ok(cursor_info(cursor.cached_info()))
    }

    async fn delete_cursor(&self, stream: &str, durable: &str) -> BrokerResult<()> {
        let handle = self.stream(stream).await?;
        handle
            .delete_consumer(durable)
            .await
            .map_err(|e| consumer_error("cursor delete", stream, durable, &e))?;
        Ok(())
    }

    async fn pull_subscribe(
        &self,
        stream: &str,
        durable: &str,
    ) -> BrokerResult<Box<dyn PullSubscription>> {
        let handle = self.stream(stream).await?;
        let consumer = handle
            .get_consumer::<consumer::pull::Config>(durable)
            .await
            .map_err(|e| consumer_error("pull subscribe", stream, durable, &e))?;
        Ok(Box::new(NatsSubscription {
            consumer,
            drained: false,
        }))
    }
}

// -----------------------------------------------------------------------------
// Pull subscription
// -----------------------------------------------------------------------------

struct NatsSubscription {
    consumer: consumer::PullConsumer,
    drained: bool,
}

#[async_trait]
impl PullSubscription for NatsSubscription {
    async fn fetch(&mut self, request: FetchRequest) -> BrokerResult<Vec<FetchedMessage>> {
        if self.drained {
            return Ok(Vec::new());
        }

        let batch = self
            .consumer
            .batch()
            .max_messages(request.batch_size as usize)
            .expires(request.max_wait)
            .messages()
            .await
            .map_err(|e| request_error("fetch", &e))?;

        collect_batch(batch, request.batch_size as usize, |message: jetstream::Message| {
            let metadata = delivery_metadata(&message);
            FetchedMessage::with_metadata(
                message.subject.to_string(),
                message.payload.clone(),
                message.reply.as_ref().map(ToString::to_string),
                metadata,
                Arc::new(NatsAcker { message }),
            )
        })
        .await
    }

    async fn drain(&mut self) -> BrokerResult<()> {
        self.drained = true;
        Ok(())
    }

    fn is_drained(&self) -> bool {
        self.drained
    }
}

/// Drains a fetch batch. An error after the first message ends the batch
/// early and keeps what was received; the broker redelivers the rest.
async fn collect_batch<S, T, E>(
    batch: S,
    capacity: usize,
    convert: impl Fn(T) -> FetchedMessage,
) -> BrokerResult<Vec<FetchedMessage>>
where
    S: futures::Stream<Item = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut batch = std::pin::pin!(batch);
    let mut messages = Vec::with_capacity(capacity);
    while let Some(next) = batch.next().await {
        match next {
            Ok(message) => messages.push(convert(message)),
            Err(e) if messages.is_empty() => return Err(request_error("fetch", &e)),
            Err(e) => {
                warn!(
                    received = messages.len(),
                    error = %e,
                    "Fetch interrupted; returning partial batch"
                );
                break;
            }
        }
    }
    Ok(messages)
}

struct NatsAcker {
    message: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn acknowledge(&self, kind: AckKind) -> BrokerResult<()> {
        let result = match kind {
            AckKind::Ack => self.message.ack().await,
            AckKind::Nak => self.message.ack_with(jetstream::AckKind::Nak(None)).await,
            AckKind::Term => self.message.ack_with(jetstream::AckKind::Term).await,
        };
        result.map_err(|e| BrokerError::Ack {
            kind,
            message: e.to_string(),
        })
    }
}

// -----------------------------------------------------------------------------
// Conversions
// -----------------------------------------------------------------------------

/// Reads the delivery metadata the client parsed from the reply subject.
fn delivery_metadata(message: &jetstream::Message) -> CoreResult<DeliveryMetadata> {
    let reply = message.reply.as_ref().ok_or(CoreError::NotCursorMessage)?;
    let malformed = |reason| CoreError::MalformedAckSubject {
        subject: reply.to_string(),
        reason,
    };

    let info = message
        .info()
        .map_err(|_| malformed("not a cursor acknowledgment subject"))?;
    let delivered =
        u64::try_from(info.delivered).map_err(|_| malformed("delivery count is negative"))?;
    let nanos = i64::try_from(info.published.unix_timestamp_nanos())
        .map_err(|_| malformed("timestamp out of range"))?;

    Ok(DeliveryMetadata {
        domain: info.domain.filter(|d| !d.is_empty()).map(ToString::to_string),
        stream: info.stream.to_string(),
        cursor: info.consumer.to_string(),
        delivered,
        stream_sequence: StreamSequence::new(info.stream_sequence),
        cursor_sequence: CursorSequence::new(info.consumer_sequence),
        timestamp: Utc.timestamp_nanos(nanos),
        pending: info.pending,
    })
}

fn request_error(operation: &'static str, err: &impl std::fmt::Display) -> BrokerError {
    BrokerError::Request {
        operation,
        message: err.to_string(),
    }
}

fn consumer_error(
    operation: &'static str,
    stream: &str,
    durable: &str,
    err: &impl std::fmt::Display,
) -> BrokerError {
    let message = err.to_string();
    if message.contains("consumer not found") {
        BrokerError::CursorNotFound {
            stream: stream.to_string(),
            cursor: durable.to_string(),
        }
    } else {
        BrokerError::Request { operation, message }
    }
}

fn stream_config(spec: &StreamSpec) -> stream::Config {
    stream::Config {
        name: spec.name.clone(),
        subjects: vec![spec.subject.clone()],
        max_age: spec.limits.max_age,
        max_bytes: spec.limits.max_bytes,
        max_messages: spec.limits.max_messages,
        num_replicas: spec.replicas as usize,
        storage: match spec.storage {
            StorageClass::File => stream::StorageType::File,
            StorageClass::Memory => stream::StorageType::Memory,
        },
        retention: match spec.retention {
            RetentionPolicy::Limits => stream::RetentionPolicy::Limits,
            RetentionPolicy::Interest => stream::RetentionPolicy::Interest,
            RetentionPolicy::WorkQueue => stream::RetentionPolicy::WorkQueue,
        },
        discard: match spec.discard {
            DiscardPolicy::Old => stream::DiscardPolicy::Old,
            DiscardPolicy::New => stream::DiscardPolicy::New,
        },
        ..Default::default()
    }
}

fn stream_info(info: &stream::Info) -> StreamInfo {
    let config = &info.config;
    StreamInfo {
        spec: StreamSpec {
            name: config.name.clone(),
            subject: config.subjects.first().cloned().unwrap_or_default(),
            limits: RetentionLimits {
                max_age: config.max_age,
                max_bytes: config.max_bytes,
                max_messages: config.max_messages,
            },
            replicas: u32::try_from(config.num_replicas).unwrap_or(u32::MAX),
            storage: match config.storage {
                stream::StorageType::Memory => StorageClass::Memory,
                stream::StorageType::File => StorageClass::File,
            },
            retention: match config.retention {
                stream::RetentionPolicy::Interest => RetentionPolicy::Interest,
                stream::RetentionPolicy::WorkQueue => RetentionPolicy::WorkQueue,
                stream::RetentionPolicy::Limits => RetentionPolicy::Limits,
            },
            discard: match config.discard {
                stream::DiscardPolicy::New => DiscardPolicy::New,
                stream::DiscardPolicy::Old => DiscardPolicy::Old,
            },
        },
        state: StreamState {
            messages: info.state.messages,
            bytes: info.state.bytes,
            first_sequence: info.state.first_sequence,
            last_sequence: info.state.last_sequence,
            cursor_count: info.state.consumer_count,
        },
    }
}

fn consumer_config(config: &CursorConfig) -> consumer::Config {
    consumer::Config {
        durable_name: Some(config.durable_name.clone()),
        description: Some(config.description.clone()),
        deliver_subject: config.deliver_subject.clone(),
        filter_subject: config.filter_subject.clone(),
        ack_policy: consumer::AckPolicy::Explicit,
        ack_wait: config.ack_wait,
        max_deliver: i64::from(config.max_deliver),
        deliver_policy: match config.deliver_policy {
            DeliverPolicy::All => consumer::DeliverPolicy::All,
            DeliverPolicy::Last => consumer::DeliverPolicy::Last,
            DeliverPolicy::New => consumer::DeliverPolicy::New,
            DeliverPolicy::LastPerSubject => consumer::DeliverPolicy::LastPerSubject,
        },
        replay_policy: match config.replay_policy {
            ReplayPolicy::Instant => consumer::ReplayPolicy::Instant,
            ReplayPolicy::Original => consumer::ReplayPolicy::Original,
        },
        ..Default::default()
    }
}

fn cursor_info(info: &consumer::Info) -> CursorInfo {
    let config = &info.config;
    CursorInfo {
        stream: info.stream_name.clone(),
        config: CursorConfig {
            durable_name: config.durable_name.clone().unwrap_or_else(|| info.name.clone()),
            description: config.description.clone().unwrap_or_default(),
            filter_subject: config.filter_subject.clone(),
            deliver_subject: config.deliver_subject.clone(),
            ack_wait: config.ack_wait,
            max_deliver: u32::try_from(config.max_deliver).unwrap_or(0),
            deliver_policy: match config.deliver_policy {
                consumer::DeliverPolicy::Last => DeliverPolicy::Last,
                consumer::DeliverPolicy::New => DeliverPolicy::New,
                consumer::DeliverPolicy::LastPerSubject => DeliverPolicy::LastPerSubject,
                _ => DeliverPolicy::All,
            },
            replay_policy: match config.replay_policy {
                consumer::ReplayPolicy::Original => ReplayPolicy::Original,
                consumer::ReplayPolicy::Instant => ReplayPolicy::Instant,
            },
        },
        num_ack_pending: info.num_ack_pending as u64,
        delivered: CursorSequence::new(info.delivered.consumer_sequence),
        num_redelivered: info.num_redelivered as u64,
        num_pending: info.num_pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flags {
        lost: AtomicBool,
        closed: AtomicBool,
    }

    impl Flags {
        fn new() -> Self {
            Self {
                lost: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }
        }

        fn translate(&self, event: Event) -> Option<LinkEvent> {
            translate_event(event, &self.lost, &self.closed)
        }
    }

    #[test]
    fn test_connected_after_disconnected_is_reconnect() {
        let flags = Flags::new();

        assert_eq!(flags.translate(Event::Connected), Some(LinkEvent::Connected));
        assert_eq!(flags.translate(Event::Disconnected), Some(LinkEvent::Disconnected));
        assert_eq!(flags.translate(Event::Connected), Some(LinkEvent::Reconnected));
        assert_eq!(flags.translate(Event::Connected), Some(LinkEvent::Connected));
    }

    #[test]
    fn test_client_close_is_reported_once() {
        let flags = Flags::new();

        assert_eq!(flags.translate(Event::Closed), Some(LinkEvent::Closed));
        assert_eq!(flags.translate(Event::Closed), None);
        assert!(flags.closed.load(Ordering::Acquire));
    }

    #[test]
    fn test_client_close_after_link_close_is_suppressed() {
        let flags = Flags::new();
        flags.closed.store(true, Ordering::Release);

        assert_eq!(flags.translate(Event::Closed), None);
    }

    #[test]
    fn test_server_error_is_forwarded() {
        let flags = Flags::new();
        let event = flags.translate(Event::ServerError(async_nats::ServerError::Other(
            "permissions violation".to_string(),
        )));

        assert!(matches!(
            event,
            Some(LinkEvent::Error { message }) if message.contains("permissions violation")
        ));
    }

    struct NoopAcker;

    #[async_trait]
    impl Acker for NoopAcker {
        async fn acknowledge(&self, _kind: AckKind) -> BrokerResult<()> {
            Ok(())
        }
    }

    fn numbered(n: u32) -> FetchedMessage {
        FetchedMessage::new(
            format!("events.{n}"),
            bytes::Bytes::new(),
            None,
            Arc::new(NoopAcker),
        )
    }

    #[tokio::test]
    async fn test_batch_error_keeps_received_messages() {
        let batch = futures::stream::iter(vec![Ok(1), Ok(2), Err("connection reset"), Ok(3)]);

        let messages = collect_batch(batch, 10, numbered).await.unwrap();

        let subjects: Vec<_> = messages.iter().map(|m| m.subject.as_str()).collect();
        assert_eq!(subjects, vec!["events.1", "events.2"]);
    }

    #[tokio::test]
    async fn test_batch_error_before_first_message_fails_fetch() {
        let batch = futures::stream::iter(vec![Err("connection reset"), Ok(1)]);

        let err = collect_batch(batch, 10, numbered).await.unwrap_err();

        assert!(matches!(err, BrokerError::Request { operation: "fetch", .. }));
    }

    #[test]
    fn test_other_events_are_dropped() {
        let flags = Flags::new();

        assert_eq!(flags.translate(Event::LameDuckMode), None);
        assert_eq!(flags.translate(Event::SlowConsumer(7)), None);
    }
}
