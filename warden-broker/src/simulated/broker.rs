//! In-memory broker state: streams, durable cursors and deliveries.

#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use warden_core::{
    subject, CursorSequence, DeliverPolicy, DeliveryMetadata, DiscardPolicy, StreamSequence,
    StreamSpec,
};

use super::faults::BrokerFaultConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::info::{CursorConfig, CursorInfo, StreamInfo, StreamState};
use crate::message::{AckKind, Acker, FetchedMessage};
use crate::session::FetchRequest;

// -----------------------------------------------------------------------------
// Call log
// -----------------------------------------------------------------------------

/// One acknowledgment received by the simulated broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRecord {
    /// Stream sequence of the acknowledged message.
    pub stream_sequence: StreamSequence,
    /// Delivery count of the acknowledged delivery.
    pub delivered: u64,
    /// Acknowledgment kind.
    pub kind: AckKind,
}

/// Counts of operations the simulated broker has served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    /// Successful stream creations.
    pub stream_creates: u64,
    /// Successful stream updates.
    pub stream_updates: u64,
    /// Successful stream deletions.
    pub stream_deletes: u64,
    /// Successful cursor creations.
    pub cursor_creates: u64,
    /// Successful cursor deletions.
    pub cursor_deletes: u64,
    /// Sessions derived.
    pub sessions_derived: u64,
    /// Fetch requests that reached the broker.
    pub fetches: u64,
    /// Fetch requests per session id.
    pub fetches_by_session: BTreeMap<u64, u64>,
    /// Every acknowledgment received, in order.
    pub acks: Vec<AckRecord>,
}

impl CallLog {
    /// Returns the acknowledgments of the given kind.
    #[must_use]
    pub fn acks_of(&self, kind: AckKind) -> Vec<AckRecord> {
        self.acks.iter().filter(|r| r.kind == kind).copied().collect()
    }
}

// -----------------------------------------------------------------------------
// State
// -----------------------------------------------------------------------------

#[derive(Debug)]
struct StoredMessage {
    subject: String,
    payload: Bytes,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct PendingDelivery {
    delivered: u64,
    deadline: Instant,
    requeued: bool,
}

#[derive(Debug)]
struct SimCursor {
    config: CursorConfig,
    next_sequence: u64,
    cursor_sequence: u64,
    pending: BTreeMap<u64, PendingDelivery>,
    redelivered: u64,
    terminated: Vec<StreamSequence>,
}

#[derive(Debug)]
struct SimStream {
    spec: StreamSpec,
    messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
    bytes: u64,
    cursors: BTreeMap<String, SimCursor>,
}

impl SimStream {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            messages: BTreeMap::new(),
            last_sequence: 0,
            bytes: 0,
            cursors: BTreeMap::new(),
        }
    }

    fn info(&self) -> StreamInfo {
        StreamInfo {
            spec: self.spec.clone(),
            state: StreamState {
                messages: self.messages.len() as u64,
                bytes: self.bytes,
                first_sequence: self.messages.keys().next().copied().unwrap_or(0),
                last_sequence: self.last_sequence,
                cursor_count: self.cursors.len(),
            },
        }
    }

    fn is_full(&self, incoming: u64) -> bool {
        let max_messages = u64::try_from(self.spec.limits.max_messages).unwrap_or(u64::MAX);
        let max_bytes = u64::try_from(self.spec.limits.max_bytes).unwrap_or(u64::MAX);
        self.messages.len() as u64 >= max_messages || self.bytes + incoming > max_bytes
    }

    /// Drops the oldest messages until the stream is within its limits.
    fn enforce_limits(&mut self) {
        let max_messages = u64::try_from(self.spec.limits.max_messages).unwrap_or(u64::MAX);
        let max_bytes = u64::try_from(self.spec.limits.max_bytes).unwrap_or(u64::MAX);
        while self.messages.len() as u64 > max_messages || self.bytes > max_bytes {
            let Some((_, oldest)) = self.messages.pop_first() else {
                break;
            };
            self.bytes -= oldest.payload.len() as u64;
        }
    }

    fn pending_for(&self, cursor: &SimCursor) -> u64 {
        self.messages
            .range(cursor.next_sequence..)
            .filter(|(_, m)| subject::matches(&cursor.config.filter_subject, &m.subject))
            .count() as u64
    }

    fn cursor_info(&self, cursor: &SimCursor) -> CursorInfo {
        CursorInfo {
            stream: self.spec.name.clone(),
            config: cursor.config.clone(),
            num_ack_pending: cursor.pending.len() as u64,
            delivered: CursorSequence::new(cursor.cursor_sequence),
            num_redelivered: cursor.redelivered,
            num_pending: self.pending_for(cursor),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    streams: BTreeMap<String, SimStream>,
    calls: CallLog,
    next_session_id: u64,
}

/// One delivery chosen by a fetch, built into a message outside the lock.
struct Delivery {
    subject: String,
    payload: Bytes,
    reply: String,
    stream_sequence: StreamSequence,
    delivered: u64,
}

// -----------------------------------------------------------------------------
// SimulatedBroker
// -----------------------------------------------------------------------------

/// In-memory JetStream-style broker for deterministic testing.
///
/// Streams capture published messages by subject; durable cursors track
/// deliveries, redeliver on negative acknowledgment or ack-wait expiry, and
/// stop redelivering once a message reaches its maximum delivery count.
///
/// # Determinism
///
/// All fault injection uses a seeded RNG based on a hash of the seed and
/// operation counter, ensuring reproducible behavior across test runs.
///
/// # Cloning
///
/// Clones share the same underlying state (via `Arc`).
#[derive(Debug, Clone)]
pub struct SimulatedBroker {
    state: Arc<Mutex<BrokerState>>,
    fault_config: Arc<Mutex<BrokerFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl SimulatedBroker {
    /// Creates a new simulated broker with the given seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, BrokerFaultConfig::default())
    }

    /// Creates a new simulated broker with fault injection enabled.
    #[must_use]
    pub fn with_faults(seed: u64, config: BrokerFaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns a reference to the fault configuration for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, BrokerFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Returns a snapshot of the call log.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn calls(&self) -> CallLog {
        self.lock_state().calls.clone()
    }

    /// Publishes a message to the stream capturing `subject`.
    ///
    /// Returns `None` if no stream captures the subject or the stream is
    /// full and discards new messages.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Option<StreamSequence> {
        let payload = payload.into();
        let mut state = self.lock_state();
        let stream = state
            .streams
            .values_mut()
            .find(|s| subject::matches(&s.spec.subject, subject))?;

        if stream.spec.discard == DiscardPolicy::New && stream.is_full(payload.len() as u64) {
            return None;
        }

        stream.last_sequence += 1;
        let sequence = stream.last_sequence;
        stream.bytes += payload.len() as u64;
        stream.messages.insert(
            sequence,
            StoredMessage {
                subject: subject.to_string(),
                payload,
                timestamp: Utc::now(),
            },
        );
        stream.enforce_limits();
        drop(state);

        self.notify.notify_waiters();
        Some(StreamSequence::new(sequence))
    }

    /// Returns the live spec of a stream.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn stream_spec(&self, stream: &str) -> Option<StreamSpec> {
        self.lock_state().streams.get(stream).map(|s| s.spec.clone())
    }

    /// Returns the live configuration of a cursor.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn cursor_config(&self, stream: &str, durable: &str) -> Option<CursorConfig> {
        self.lock_state()
            .streams
            .get(stream)
            .and_then(|s| s.cursors.get(durable))
            .map(|c| c.config.clone())
    }

    /// Returns the stream sequences a cursor has terminated.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn terminated(&self, stream: &str, durable: &str) -> Vec<StreamSequence> {
        self.lock_state()
            .streams
            .get(stream)
            .and_then(|s| s.cursors.get(durable))
            .map(|c| c.terminated.clone())
            .unwrap_or_default()
    }

    /// Returns the number of deliveries awaiting acknowledgment on a cursor.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn ack_pending(&self, stream: &str, durable: &str) -> usize {
        self.lock_state()
            .streams
            .get(stream)
            .and_then(|s| s.cursors.get(durable))
            .map_or(0, |c| c.pending.len())
    }

    // ----- Session operations -----

    pub(crate) fn register_session(&self) -> BrokerResult<u64> {
        if self.take_forced(|c| &mut c.force_session_fail) {
            return Err(BrokerError::Request {
                operation: "session derive",
                message: "simulated session failure (forced)".to_string(),
            });
        }
        let mut state = self.lock_state();
        state.next_session_id += 1;
        state.calls.sessions_derived += 1;
        Ok(state.next_session_id)
    }

    pub(crate) fn take_connect_fault(&self) -> bool {
        self.take_forced(|c| &mut c.force_connect_fail)
    }

    pub(crate) fn stream_info(&self, stream: &str) -> BrokerResult<StreamInfo> {
        self.check_forced("stream lookup", |c| &mut c.force_lookup_fail)?;
        let state = self.lock_state();
        state
            .streams
            .get(stream)
            .map(SimStream::info)
            .ok_or_else(|| BrokerError::StreamNotFound {
                stream: stream.to_string(),
            })
    }

    pub(crate) fn create_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        self.check_forced("stream create", |c| &mut c.force_create_fail)?;
        spec.validate()?;
        let mut state = self.lock_state();
        if state.streams.contains_key(&spec.name) {
            return Err(BrokerError::Request {
                operation: "stream create",
                message: "stream name already in use".to_string(),
            });
        }
        let stream = SimStream::new(spec.clone());
        let info = stream.info();
        state.streams.insert(spec.name.clone(), stream);
        state.calls.stream_creates += 1;
        debug!(stream = %spec.name, "Simulated stream created");
        Ok(info)
    }

    pub(crate) fn update_stream(&self, spec: &StreamSpec) -> BrokerResult<StreamInfo> {
        self.check_forced("stream update", |c| &mut c.force_update_fail)?;
        spec.validate()?;
        let mut state = self.lock_state();
        let stream = state
            .streams
            .get_mut(&spec.name)
            .ok_or_else(|| BrokerError::StreamNotFound {
                stream: spec.name.clone(),
            })?;
        if stream.spec.storage != spec.storage {
            return Err(BrokerError::Request {
                operation: "stream update",
                message: "stream storage class can not be changed".to_string(),
            });
        }
        stream.spec = spec.clone();
        stream.enforce_limits();
        let info = stream.info();
        state.calls.stream_updates += 1;
        Ok(info)
    }

    pub(crate) fn delete_stream(&self, stream: &str) -> BrokerResult<()> {
        self.check_forced("stream delete", |c| &mut c.force_delete_fail)?;
        let mut state = self.lock_state();
        if state.streams.remove(stream).is_none() {
            return Err(BrokerError::StreamNotFound {
                stream: stream.to_string(),
            });
        }
        state.calls.stream_deletes += 1;
        Ok(())
    }

    pub(crate) fn cursor_info(&self, stream: &str, durable: &str) -> BrokerResult<CursorInfo> {
        self.check_forced("cursor lookup", |c| &mut c.force_lookup_fail)?;
        let state = self.lock_state();
        let sim_stream = state
            .streams
            .get(stream)
            .ok_or_else(|| BrokerError::StreamNotFound {
                stream: stream.to_string(),
            })?;
        let cursor = sim_stream
            .cursors
            .get(durable)
            .ok_or_else(|| cursor_not_found(stream, durable))?;
        Ok(sim_stream.cursor_info(cursor))
    }

    pub(crate) fn create_cursor(
        &self,
        stream: &str,
        config: &CursorConfig,
    ) -> BrokerResult<CursorInfo> {
        self.check_forced("cursor create", |c| &mut c.force_create_fail)?;
        let mut state = self.lock_state();
        let sim_stream =
            state
                .streams
                .get_mut(stream)
                .ok_or_else(|| BrokerError::StreamNotFound {
                    stream: stream.to_string(),
                })?;

        if let Some(existing) = sim_stream.cursors.get(&config.durable_name) {
            if existing.config == *config {
                return Ok(sim_stream.cursor_info(existing));
            }
            return Err(BrokerError::Request {
                operation: "cursor create",
                message: "consumer already exists".to_string(),
            });
        }

        let next_sequence = match config.deliver_policy {
            DeliverPolicy::All => 1,
            DeliverPolicy::New => sim_stream.last_sequence + 1,
            DeliverPolicy::Last | DeliverPolicy::LastPerSubject => {
                sim_stream.last_sequence.max(1)
            }
        };
        let cursor = SimCursor {
            config: config.clone(),
            next_sequence,
            cursor_sequence: 0,
            pending: BTreeMap::new(),
            redelivered: 0,
            terminated: Vec::new(),
        };
        let info = sim_stream.cursor_info(&cursor);
        sim_stream.cursors.insert(config.durable_name.clone(), cursor);
        state.calls.cursor_creates += 1;
        debug!(stream, durable = %config.durable_name, push = config.is_push(), "Simulated cursor created");
        Ok(info)
    }

    pub(crate) fn delete_cursor(&self, stream: &str, durable: &str) -> BrokerResult<()> {
        self.check_forced("cursor delete", |c| &mut c.force_delete_fail)?;
        let mut state = self.lock_state();
        let removed = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.cursors.remove(durable));
        if removed.is_none() {
            return Err(cursor_not_found(stream, durable));
        }
        state.calls.cursor_deletes += 1;
        Ok(())
    }

    /// Bounded-wait batch fetch.
    pub(crate) async fn fetch(
        &self,
        session_id: u64,
        stream: &str,
        durable: &str,
        request: FetchRequest,
        connected: &Arc<AtomicBool>,
    ) -> BrokerResult<Vec<FetchedMessage>> {
        {
            let mut state = self.lock_state();
            state.calls.fetches += 1;
            *state.calls.fetches_by_session.entry(session_id).or_insert(0) += 1;
        }

        self.check_forced("fetch", |c| &mut c.force_fetch_fail)?;
        let fetch_fail_rate = self.fault_config().fetch_fail_rate;
        if self.should_inject_fault(fetch_fail_rate) {
            return Err(BrokerError::Request {
                operation: "fetch",
                message: "simulated fetch failure (random)".to_string(),
            });
        }

        let deadline = Instant::now() + request.max_wait;
        loop {
            let notified = self.notify.notified();
            let (deliveries, next_expiry) = self.collect_batch(stream, durable, request.batch_size)?;
            if !deliveries.is_empty() {
                return Ok(self.build_messages(stream, durable, deliveries, connected));
            }

            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            let woken = tokio::time::timeout_at(wake_at, notified).await.is_ok();
            if !woken && wake_at >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    pub(crate) fn acknowledge(
        &self,
        stream: &str,
        durable: &str,
        stream_sequence: StreamSequence,
        delivered: u64,
        kind: AckKind,
    ) -> BrokerResult<()> {
        let ack_fail_rate = {
            let mut config = self.fault_config();
            if config.force_ack_fail {
                config.force_ack_fail = false;
                drop(config);
                return Err(BrokerError::Ack {
                    kind,
                    message: "simulated ack failure (forced)".to_string(),
                });
            }
            config.ack_fail_rate
        };
        if self.should_inject_fault(ack_fail_rate) {
            return Err(BrokerError::Ack {
                kind,
                message: "simulated ack failure (random)".to_string(),
            });
        }

        let mut state = self.lock_state();
        let sequence = stream_sequence.get();
        if let Some(cursor) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.cursors.get_mut(durable))
        {
            match kind {
                AckKind::Ack => {
                    cursor.pending.remove(&sequence);
                }
                AckKind::Nak => {
                    if let Some(pending) = cursor.pending.get_mut(&sequence) {
                        pending.requeued = true;
                    }
                }
                AckKind::Term => {
                    if cursor.pending.remove(&sequence).is_some() {
                        cursor.terminated.push(stream_sequence);
                    }
                }
            }
        }
        state.calls.acks.push(AckRecord {
            stream_sequence,
            delivered,
            kind,
        });
        drop(state);

        if kind == AckKind::Nak {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    // ----- Internals -----

    fn lock_state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("broker state lock poisoned")
    }

    /// Chooses up to `batch_size` deliveries: due redeliveries first, then
    /// new messages. Also returns the earliest ack-wait expiry still ahead.
    fn collect_batch(
        &self,
        stream: &str,
        durable: &str,
        batch_size: u32,
    ) -> BrokerResult<(Vec<Delivery>, Option<Instant>)> {
        let now = Instant::now();
        let limit = batch_size as usize;
        let mut state = self.lock_state();
        let sim_stream = state
            .streams
            .get_mut(stream)
            .ok_or_else(|| BrokerError::StreamNotFound {
                stream: stream.to_string(),
            })?;
        let last_sequence = sim_stream.last_sequence;
        let SimStream {
            messages, cursors, ..
        } = sim_stream;
        let cursor = cursors
            .get_mut(durable)
            .ok_or_else(|| cursor_not_found(stream, durable))?;
        let max_deliver = u64::from(cursor.config.max_deliver);

        let mut chosen: Vec<u64> = cursor
            .pending
            .iter()
            .filter(|(seq, p)| {
                p.delivered < max_deliver
                    && (p.requeued || p.deadline <= now)
                    && messages.contains_key(*seq)
            })
            .map(|(seq, _)| *seq)
            .take(limit)
            .collect();

        while chosen.len() < limit {
            let next = messages
                .range(cursor.next_sequence..)
                .find(|(_, m)| subject::matches(&cursor.config.filter_subject, &m.subject))
                .map(|(seq, _)| *seq);
            if let Some(seq) = next {
                chosen.push(seq);
                cursor.next_sequence = seq + 1;
            } else {
                cursor.next_sequence = cursor.next_sequence.max(last_sequence + 1);
                break;
            }
        }

        let mut deliveries = Vec::with_capacity(chosen.len());
        for seq in chosen {
            let Some(message) = messages.get(&seq) else {
                continue;
            };
            let pending = cursor.pending.entry(seq).or_insert(PendingDelivery {
                delivered: 0,
                deadline: now,
                requeued: false,
            });
            pending.delivered += 1;
            pending.deadline = now + cursor.config.ack_wait;
            pending.requeued = false;
            let delivered = pending.delivered;
            if delivered > 1 {
                cursor.redelivered += 1;
            }
            cursor.cursor_sequence += 1;

            let remaining = messages
                .range(seq + 1..)
                .filter(|(_, m)| subject::matches(&cursor.config.filter_subject, &m.subject))
                .count() as u64;
            deliveries.push(Delivery {
                subject: message.subject.clone(),
                payload: message.payload.clone(),
                reply: DeliveryMetadata::format_v1_reply(
                    stream,
                    durable,
                    delivered,
                    StreamSequence::new(seq),
                    CursorSequence::new(cursor.cursor_sequence),
                    message.timestamp,
                    remaining,
                ),
                stream_sequence: StreamSequence::new(seq),
                delivered,
            });
        }

        let next_expiry = cursor
            .pending
            .values()
            .filter(|p| p.delivered < max_deliver && !p.requeued && p.deadline > now)
            .map(|p| p.deadline)
            .min();
        Ok((deliveries, next_expiry))
    }

    fn build_messages(
        &self,
        stream: &str,
        durable: &str,
        deliveries: Vec<Delivery>,
        connected: &Arc<AtomicBool>,
    ) -> Vec<FetchedMessage> {
        let strip_rate = self.fault_config().strip_reply_rate;
        deliveries
            .into_iter()
            .map(|d| {
                let strip = self.take_forced(|c| &mut c.force_strip_reply)
                    || self.should_inject_fault(strip_rate);
                let acker = Arc::new(SimulatedAcker {
                    broker: self.clone(),
                    stream: stream.to_string(),
                    durable: durable.to_string(),
                    stream_sequence: d.stream_sequence,
                    delivered: d.delivered,
                    connected: Arc::clone(connected),
                });
                FetchedMessage::new(d.subject, d.payload, (!strip).then_some(d.reply), acker)
            })
            .collect()
    }

    /// Consumes a one-shot fault flag.
    fn take_forced(&self, flag: impl FnOnce(&mut BrokerFaultConfig) -> &mut bool) -> bool {
        let mut config = self.fault_config();
        std::mem::replace(flag(&mut config), false)
    }

    fn check_forced(
        &self,
        operation: &'static str,
        flag: impl FnOnce(&mut BrokerFaultConfig) -> &mut bool,
    ) -> BrokerResult<()> {
        if self.take_forced(flag) {
            return Err(BrokerError::Request {
                operation,
                message: "simulated failure (forced)".to_string(),
            });
        }
        Ok(())
    }

    /// Deterministic RNG based on seed and counter.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self.seed.wrapping_add(counter).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        // Safety: precision loss is acceptable for probability calculation.
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }
}

fn cursor_not_found(stream: &str, durable: &str) -> BrokerError {
    BrokerError::CursorNotFound {
        stream: stream.to_string(),
        cursor: durable.to_string(),
    }
}

// -----------------------------------------------------------------------------
// Acker
// -----------------------------------------------------------------------------

/// Acknowledgment channel of one simulated delivery.
///
/// Bound to the link's connectivity flag, not to the session that fetched.
struct SimulatedAcker {
    broker: SimulatedBroker,
    stream: String,
    durable: String,
    stream_sequence: StreamSequence,
    delivered: u64,
    connected: Arc<AtomicBool>,
}

#[async_trait]
impl Acker for SimulatedAcker {
    async fn acknowledge(&self, kind: AckKind) -> BrokerResult<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(BrokerError::Ack {
                kind,
                message: "link disconnected".to_string(),
            });
        }
        self.broker.acknowledge(
            &self.stream,
            &self.durable,
            self.stream_sequence,
            self.delivered,
            kind,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use warden_core::DurableCursorSpec;

    const SHORT_ACK_WAIT: Duration = Duration::from_millis(100);

    fn setup() -> SimulatedBroker {
        let broker = SimulatedBroker::new(42);
        broker.create_stream(&StreamSpec::default()).unwrap();
        broker
            .create_cursor("EVENTS", &CursorConfig::pull(&DurableCursorSpec::default()))
            .unwrap();
        broker
    }

    fn connected() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    fn request(batch_size: u32) -> FetchRequest {
        FetchRequest {
            batch_size,
            max_wait: Duration::from_secs(5),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_delivers_in_order_with_metadata() {
        let broker = setup();
        broker.publish("events.a", Bytes::from_static(b"1"));
        broker.publish("events.b", Bytes::from_static(b"2"));
        assert!(broker.publish("orders.a", Bytes::from_static(b"x")).is_none());

        let batch = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &connected())
            .await
            .unwrap();
        assert_eq!(batch.len(), 2);

        let meta = batch[0].metadata().unwrap();
        assert_eq!(meta.stream, "EVENTS");
        assert_eq!(meta.stream_sequence.get(), 1);
        assert_eq!(meta.delivered, 1);
        assert_eq!(meta.pending, 1);
        assert_eq!(batch[1].metadata().unwrap().pending, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_wait_expires_empty() {
        let broker = setup();
        let start = Instant::now();
        let batch = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &connected())
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nak_redelivers_until_max_deliver() {
        let broker = setup();
        broker.publish("events.a", Bytes::from_static(b"1"));
        let link = connected();

        for attempt in 1..=3 {
            let batch = broker
                .fetch(1, "EVENTS", "events-audit-durable", request(10), &link)
                .await
                .unwrap();
            assert_eq!(batch.len(), 1);
            assert_eq!(batch[0].metadata().unwrap().delivered, attempt);
            batch[0].nak().await.unwrap();
        }

        // Third delivery was the last allowed one.
        let batch = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &link)
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacked_delivery_redelivers_after_ack_wait() {
        let broker = SimulatedBroker::new(7);
        broker.create_stream(&StreamSpec::default()).unwrap();
        let spec = DurableCursorSpec::default().with_ack_wait(SHORT_ACK_WAIT);
        broker.create_cursor("EVENTS", &CursorConfig::pull(&spec)).unwrap();
        broker.publish("events.a", Bytes::from_static(b"1"));
        let link = connected();

        let first = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &link)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let again = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &link)
            .await
            .unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].metadata().unwrap().delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_term_removes_from_pending() {
        let broker = setup();
        let seq = broker.publish("events.a", Bytes::from_static(b"1")).unwrap();
        let batch = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &connected())
            .await
            .unwrap();
        batch[0].term().await.unwrap();

        assert_eq!(broker.terminated("EVENTS", "events-audit-durable"), vec![seq]);
        assert_eq!(broker.ack_pending("EVENTS", "events-audit-durable"), 0);
        assert_eq!(broker.calls().acks_of(AckKind::Term).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acker_fails_while_disconnected() {
        let broker = setup();
        broker.publish("events.a", Bytes::from_static(b"1"));
        let link = connected();
        let batch = broker
            .fetch(1, "EVENTS", "events-audit-durable", request(10), &link)
            .await
            .unwrap();

        link.store(false, Ordering::Release);
        assert!(matches!(
            batch[0].ack().await,
            Err(BrokerError::Ack { kind: AckKind::Ack, .. })
        ));
        link.store(true, Ordering::Release);
        batch[0].ack().await.unwrap();
    }

    #[test]
    fn test_discard_old_keeps_newest() {
        let broker = SimulatedBroker::new(1);
        let mut spec = StreamSpec::default();
        spec.limits.max_messages = 2;
        broker.create_stream(&spec).unwrap();
        for i in 0..5u8 {
            broker.publish("events.a", vec![i]);
        }
        let info = broker.stream_info("EVENTS").unwrap();
        assert_eq!(info.state.messages, 2);
        assert_eq!(info.state.first_sequence, 4);
        assert_eq!(info.state.last_sequence, 5);
    }

    #[test]
    fn test_forced_faults_are_one_shot() {
        let broker = SimulatedBroker::with_faults(
            3,
            BrokerFaultConfig::none().with_force_lookup_fail(),
        );
        assert!(matches!(
            broker.stream_info("EVENTS"),
            Err(BrokerError::Request { .. })
        ));
        assert!(broker.stream_info("EVENTS").unwrap_err().is_not_found());
    }

    #[test]
    fn test_update_rejects_storage_change() {
        let broker = SimulatedBroker::new(1);
        broker.create_stream(&StreamSpec::default()).unwrap();
        let spec = StreamSpec::default().with_storage(warden_core::StorageClass::Memory);
        assert!(broker.update_stream(&spec).is_err());
        assert_eq!(broker.calls().stream_updates, 0);
    }
}
