//! Pull engine.
//!
//! A single worker that drives fetch, dispatch and acknowledgment for one
//! durable cursor. Each iteration:
//!
//! 1. Re-binds the pull subscription if the session generation changed.
//! 2. Fetches one bounded-wait batch. An expired wait is not an error; any
//!    other failure is logged and followed by one fixed backoff.
//! 3. Dispatches every message in order and acknowledges it according to
//!    its [`Disposition`].
//! 4. Checks cancellation.
//!
//! A fetched batch is always fully dispatched before cancellation is
//! observed. Backpressure is the batch size.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_broker::{AckKind, FetchRequest, FetchedMessage, PullSubscription};
use warden_core::{Disposition, SessionGeneration, StreamSequence};

use crate::config::PullConfig;
use crate::error::{ConsumerError, ConsumerResult};
use crate::handler::MessageHandler;
use crate::session_cell::SessionCell;

// -----------------------------------------------------------------------------
// Reports
// -----------------------------------------------------------------------------

/// How `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The cancellation token fired.
    Cancelled,
}

/// What one iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The fetch wait expired with no messages.
    Idle,
    /// The fetch, or the re-bind before it, failed.
    FetchFailed,
    /// A drain was requested; no fetch reached the broker.
    Drained,
    /// A non-empty batch was dispatched.
    Dispatched,
}

/// What happened to one dispatched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// The handler ran and the message was acknowledged accordingly.
    Disposed(Disposition),
    /// Metadata could not be read; the message was negatively acknowledged
    /// without running the handler.
    Requeued,
}

/// Record of one dispatched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Subject of the message.
    pub subject: String,
    /// Stream sequence, when metadata was readable.
    pub stream_sequence: Option<StreamSequence>,
    /// What was done.
    pub outcome: MessageOutcome,
}

/// Result of a single iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// What the iteration did.
    pub outcome: BatchOutcome,
    /// Dispatched messages in fetch order.
    pub records: Vec<DispatchRecord>,
}

impl BatchReport {
    const fn empty(outcome: BatchOutcome) -> Self {
        Self {
            outcome,
            records: Vec::new(),
        }
    }

    /// Returns the dispositions of messages that reached the handler.
    #[must_use]
    pub fn dispositions(&self) -> Vec<Disposition> {
        self.records
            .iter()
            .filter_map(|r| match r.outcome {
                MessageOutcome::Disposed(d) => Some(d),
                MessageOutcome::Requeued => None,
            })
            .collect()
    }
}

// -----------------------------------------------------------------------------
// Stats
// -----------------------------------------------------------------------------

/// Engine counters, readable while the engine runs.
#[derive(Debug, Default)]
pub struct EngineStats {
    fetches: AtomicU64,
    idle_polls: AtomicU64,
    fetch_errors: AtomicU64,
    backoffs: AtomicU64,
    acks: AtomicU64,
    retries: AtomicU64,
    terminals: AtomicU64,
    metadata_requeues: AtomicU64,
    ack_failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStatsSnapshot {
    /// Fetches issued to the broker.
    pub fetches: u64,
    /// Fetches whose wait expired empty.
    pub idle_polls: u64,
    /// Failed fetches and re-binds.
    pub fetch_errors: u64,
    /// Backoff sleeps taken.
    pub backoffs: u64,
    /// Messages acknowledged.
    pub acks: u64,
    /// Messages negatively acknowledged after a handler failure.
    pub retries: u64,
    /// Messages terminated.
    pub terminals: u64,
    /// Messages negatively acknowledged for unreadable metadata.
    pub metadata_requeues: u64,
    /// Acknowledgment calls that failed.
    pub ack_failures: u64,
}

impl EngineStats {
    /// Returns a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            idle_polls: self.idle_polls.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            acks: self.acks.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            terminals: self.terminals.load(Ordering::Relaxed),
            metadata_requeues: self.metadata_requeues.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Requests that the engine drain its subscription.
///
/// Once requested, the engine drains the subscription at the start of its
/// next iteration and stops fetching; `run` keeps going until cancelled.
#[derive(Debug, Clone, Default)]
pub struct DrainHandle {
    requested: Arc<AtomicBool>,
}

impl DrainHandle {
    /// Requests a drain.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Returns true once a drain was requested.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

// -----------------------------------------------------------------------------
// PullEngine
// -----------------------------------------------------------------------------

/// The stream and durable cursor an engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineBinding {
    /// Stream name.
    pub stream: String,
    /// Durable cursor name.
    pub durable: String,
}

impl EngineBinding {
    /// Creates a binding.
    #[must_use]
    pub fn new(stream: impl Into<String>, durable: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            durable: durable.into(),
        }
    }
}

/// Fetch/dispatch/ack loop over a durable pull cursor.
pub struct PullEngine {
    cell: Arc<SessionCell>,
    binding: EngineBinding,
    config: PullConfig,
    subscription: Option<Box<dyn PullSubscription>>,
    bound_generation: SessionGeneration,
    stats: Arc<EngineStats>,
    drain: DrainHandle,
}

impl PullEngine {
    /// Opens a pull subscription on the cell's current session.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` fails validation, `StaleSession`
    /// if the cell is stale, or `Subscribe` if the subscription cannot be
    /// opened.
    pub async fn bind(
        cell: Arc<SessionCell>,
        binding: EngineBinding,
        config: PullConfig,
    ) -> ConsumerResult<Self> {
        config.validate()?;
        let slot = cell.current();
        let subscription = subscribe(&slot.session()?, &binding).await?;
        info!(
            stream = %binding.stream,
            durable = %binding.durable,
            generation = %slot.generation(),
            batch_size = config.batch_size,
            max_wait = ?config.max_wait,
            "Pull subscription bound"
        );
        Ok(Self {
            cell,
            binding,
            config,
            subscription: Some(subscription),
            bound_generation: slot.generation(),
            stats: Arc::new(EngineStats::default()),
            drain: DrainHandle::default(),
        })
    }

    /// Returns the engine's counters.
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Returns a handle that requests a drain.
    #[must_use]
    pub fn drain_handle(&self) -> DrainHandle {
        self.drain.clone()
    }

    /// Returns the binding.
    #[must_use]
    pub const fn binding(&self) -> &EngineBinding {
        &self.binding
    }

    /// Runs until `cancel` fires.
    ///
    /// Fetch errors and acknowledgment failures never end the loop.
    ///
    /// # Errors
    /// Currently never returns an error; the `Result` leaves room for fatal
    /// conditions.
    pub async fn run<H>(
        &mut self,
        cancel: &CancellationToken,
        handler: &H,
    ) -> ConsumerResult<RunOutcome>
    where
        H: MessageHandler + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                self.drain_if_requested().await;
                info!(durable = %self.binding.durable, "Pull engine cancelled");
                return Ok(RunOutcome::Cancelled);
            }

            match self.run_once(handler).await {
                Ok(report) => match report.outcome {
                    BatchOutcome::Idle | BatchOutcome::Dispatched => {}
                    BatchOutcome::FetchFailed => {
                        EngineStats::bump(&self.stats.backoffs);
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            () = tokio::time::sleep(self.config.fetch_backoff) => {}
                        }
                    }
                    BatchOutcome::Drained => {
                        tokio::select! {
                            () = cancel.cancelled() => {}
                            () = tokio::time::sleep(self.config.max_wait) => {}
                        }
                    }
                },
                // Already logged per message.
                Err(e) => debug!(error = %e, "Iteration finished with an error"),
            }
        }
    }

    /// Runs a single iteration: re-bind if needed, fetch, dispatch.
    ///
    /// # Errors
    /// Returns the first `Acknowledge` error of the batch, after the whole
    /// batch has been dispatched.
    pub async fn run_once<H>(&mut self, handler: &H) -> ConsumerResult<BatchReport>
    where
        H: MessageHandler + ?Sized,
    {
        if self.drain_if_requested().await {
            return Ok(BatchReport::empty(BatchOutcome::Drained));
        }

        if let Err(e) = self.ensure_bound().await {
            EngineStats::bump(&self.stats.fetch_errors);
            error!(
                stream = %self.binding.stream,
                durable = %self.binding.durable,
                error = %e,
                "Failed to bind pull subscription"
            );
            return Ok(BatchReport::empty(BatchOutcome::FetchFailed));
        }
        let Some(subscription) = self.subscription.as_mut() else {
            return Ok(BatchReport::empty(BatchOutcome::FetchFailed));
        };

        EngineStats::bump(&self.stats.fetches);
        let request = FetchRequest {
            batch_size: self.config.batch_size,
            max_wait: self.config.max_wait,
        };
        let messages = match subscription.fetch(request).await {
            Ok(messages) if messages.is_empty() => {
                EngineStats::bump(&self.stats.idle_polls);
                return Ok(BatchReport::empty(BatchOutcome::Idle));
            }
            Ok(messages) => messages,
            Err(e) => {
                EngineStats::bump(&self.stats.fetch_errors);
                error!(
                    stream = %self.binding.stream,
                    durable = %self.binding.durable,
                    error = %e,
                    "Fetch failed"
                );
                return Ok(BatchReport::empty(BatchOutcome::FetchFailed));
            }
        };

        debug!(count = messages.len(), "Fetched batch");
        let mut records = Vec::with_capacity(messages.len());
        let mut first_failure = None;
        for message in &messages {
            let (record, acked) =
                dispatch(message, handler, &self.stats, self.config.max_deliver).await;
            records.push(record);
            if let Err(e) = acked {
                first_failure.get_or_insert(e);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(BatchReport {
                outcome: BatchOutcome::Dispatched,
                records,
            }),
        }
    }

    /// Drains the subscription once a drain was requested. Returns true if
    /// a drain was requested.
    async fn drain_if_requested(&mut self) -> bool {
        if !self.drain.is_requested() {
            return false;
        }
        if let Some(subscription) = self.subscription.as_mut() {
            if !subscription.is_drained() {
                match subscription.drain().await {
                    Ok(()) => info!(durable = %self.binding.durable, "Pull subscription drained"),
                    Err(e) => warn!(
                        durable = %self.binding.durable,
                        error = %e,
                        "Failed to drain pull subscription"
                    ),
                }
            }
        }
        true
    }

    /// Re-binds the subscription if the published session changed.
    async fn ensure_bound(&mut self) -> ConsumerResult<()> {
        let slot = self.cell.current();
        if self.subscription.is_some() && slot.generation() == self.bound_generation {
            return Ok(());
        }

        self.subscription = None;
        self.bound_generation = slot.generation();
        let subscription = subscribe(&slot.session()?, &self.binding).await?;
        self.subscription = Some(subscription);
        info!(
            durable = %self.binding.durable,
            generation = %slot.generation(),
            "Pull subscription re-bound on new session"
        );
        Ok(())
    }
}

impl std::fmt::Debug for PullEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullEngine")
            .field("binding", &self.binding)
            .field("config", &self.config)
            .field("bound_generation", &self.bound_generation)
            .field("subscribed", &self.subscription.is_some())
            .finish_non_exhaustive()
    }
}

async fn subscribe(
    session: &Arc<dyn warden_broker::Session>,
    binding: &EngineBinding,
) -> ConsumerResult<Box<dyn PullSubscription>> {
    session
        .pull_subscribe(&binding.stream, &binding.durable)
        .await
        .map_err(|source| ConsumerError::Subscribe {
            stream: binding.stream.clone(),
            cursor: binding.durable.clone(),
            source,
        })
}

async fn dispatch<H>(
    message: &FetchedMessage,
    handler: &H,
    stats: &EngineStats,
    max_deliver: u32,
) -> (DispatchRecord, ConsumerResult<()>)
where
    H: MessageHandler + ?Sized,
{
    let metadata = match message.metadata() {
        Ok(metadata) => metadata,
        Err(e) => {
            EngineStats::bump(&stats.metadata_requeues);
            warn!(
                subject = %message.subject,
                error = %e,
                "Unreadable delivery metadata; requeueing"
            );
            let record = DispatchRecord {
                subject: message.subject.clone(),
                stream_sequence: None,
                outcome: MessageOutcome::Requeued,
            };
            return (record, acknowledge(message, stats, AckKind::Nak).await);
        }
    };

    let result = handler.handle(message, metadata).await;
    let disposition = Disposition::decide(result.is_ok(), metadata.delivered, max_deliver);
    match (&result, disposition) {
        (Err(cause), Disposition::Terminal) => {
            EngineStats::bump(&stats.terminals);
            error!(
                subject = %message.subject,
                stream_sequence = %metadata.stream_sequence,
                delivered = metadata.delivered,
                max_deliver,
                error_kind = %cause.kind(),
                error = %cause,
                "Handler failed on final delivery; terminating message"
            );
        }
        (Err(cause), _) => {
            EngineStats::bump(&stats.retries);
            warn!(
                subject = %message.subject,
                stream_sequence = %metadata.stream_sequence,
                delivered = metadata.delivered,
                max_deliver,
                error_kind = %cause.kind(),
                error = %cause,
                "Handler failed; requesting redelivery"
            );
        }
        (Ok(()), _) => EngineStats::bump(&stats.acks),
    }

    let record = DispatchRecord {
        subject: message.subject.clone(),
        stream_sequence: Some(metadata.stream_sequence),
        outcome: MessageOutcome::Disposed(disposition),
    };
    (record, acknowledge(message, stats, AckKind::from(disposition)).await)
}

async fn acknowledge(
    message: &FetchedMessage,
    stats: &EngineStats,
    kind: AckKind,
) -> ConsumerResult<()> {
    message.acknowledge(kind).await.map_err(|source| {
        EngineStats::bump(&stats.ack_failures);
        error!(
            subject = %message.subject,
            kind = %kind,
            error = %source,
            "Acknowledgment failed"
        );
        ConsumerError::Acknowledge {
            subject: message.subject.clone(),
            kind,
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;
    use warden_broker::{
        BrokerFaultConfig, ConnectOptions, SimulatedBroker, SimulatedTransport, Transport,
    };
    use warden_core::{DeliveryMetadata, DurableCursorSpec, StreamSpec};

    use super::*;
    use crate::handler::{handler_fn, HandlerError};
    use crate::reconciler::TopologyReconciler;

    async fn reconciled_cell(broker: &SimulatedBroker) -> Arc<SessionCell> {
        let transport = SimulatedTransport::new(broker.clone());
        let (tx, _rx) = mpsc::unbounded_channel();
        let link = transport
            .connect("sim://local", &ConnectOptions::default(), tx)
            .await
            .unwrap();
        let session = link.derive_session().await.unwrap();
        let reconciler = TopologyReconciler::new(Arc::clone(&session));
        reconciler.ensure_stream(&StreamSpec::default()).await.unwrap();
        reconciler
            .ensure_cursor("EVENTS", &DurableCursorSpec::default())
            .await
            .unwrap();
        Arc::new(SessionCell::new(session))
    }

    async fn setup(broker: &SimulatedBroker) -> PullEngine {
        let config = PullConfig {
            max_wait: Duration::from_millis(50),
            fetch_backoff: Duration::from_millis(100),
            ..PullConfig::default()
        };
        PullEngine::bind(
            reconciled_cell(broker).await,
            EngineBinding::new("EVENTS", "events-audit-durable"),
            config,
        )
        .await
        .unwrap()
    }

    fn fail_on(subject: &'static str) -> impl MessageHandler {
        handler_fn(move |m: &FetchedMessage, _: &DeliveryMetadata| {
            if m.subject == subject {
                Err(HandlerError::new("boom"))
            } else {
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_bind_rejects_zero_max_deliver() {
        let broker = SimulatedBroker::new(42);
        let cell = reconciled_cell(&broker).await;
        let config = PullConfig {
            max_deliver: 0,
            ..PullConfig::default()
        };

        let err = PullEngine::bind(
            cell,
            EngineBinding::new("EVENTS", "events-audit-durable"),
            config,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ConsumerError::InvalidConfig(_)));
        assert!(err.to_string().contains("max_deliver"));
    }

    #[tokio::test]
    async fn test_bind_rejects_empty_batch() {
        let broker = SimulatedBroker::new(42);
        let cell = reconciled_cell(&broker).await;
        let config = PullConfig {
            batch_size: 0,
            ..PullConfig::default()
        };

        let result = PullEngine::bind(
            cell,
            EngineBinding::new("EVENTS", "events-audit-durable"),
            config,
        )
        .await;

        assert!(matches!(result, Err(ConsumerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_batch_dispositions_in_order() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        broker.publish("events.a", "1");
        broker.publish("events.b", "2");
        broker.publish("events.c", "3");

        let report = engine.run_once(&fail_on("events.b")).await.unwrap();

        assert_eq!(report.outcome, BatchOutcome::Dispatched);
        assert_eq!(
            report.dispositions(),
            vec![Disposition::Ack, Disposition::Retry, Disposition::Ack]
        );
        let stats = engine.stats().snapshot();
        assert_eq!(stats.acks, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(broker.calls().acks_of(AckKind::Nak).len(), 1);
    }

    #[tokio::test]
    async fn test_payload_failure_is_retried_like_any_other() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        broker.publish("events.a", "{broken");
        let handler = handler_fn(|_: &FetchedMessage, _: &DeliveryMetadata| {
            Err(HandlerError::payload("unreadable event").with_source(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected value",
            )))
        });

        let report = engine.run_once(&handler).await.unwrap();

        assert_eq!(report.dispositions(), vec![Disposition::Retry]);
        assert!(broker.calls().acks_of(AckKind::Term).is_empty());
    }

    #[tokio::test]
    async fn test_final_delivery_is_terminated_once() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        broker.publish("events.bad", "x");
        let handler = fail_on("events.bad");

        for _ in 0..3 {
            engine.run_once(&handler).await.unwrap();
        }
        let after = engine.run_once(&handler).await.unwrap();

        assert_eq!(after.outcome, BatchOutcome::Idle);
        let stats = engine.stats().snapshot();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.terminals, 1);
        let terms = broker.calls().acks_of(AckKind::Term);
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].delivered, 3);
        assert_eq!(broker.terminated("EVENTS", "events-audit-durable").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_metadata_naks_without_handler() {
        let broker = SimulatedBroker::with_faults(
            42,
            BrokerFaultConfig::none().with_force_strip_reply(),
        );
        let mut engine = setup(&broker).await;
        broker.publish("events.a", "1");
        let handled = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&handled);
        let handler = handler_fn(move |_: &FetchedMessage, _: &DeliveryMetadata| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });

        let report = engine.run_once(&handler).await.unwrap();

        assert_eq!(report.records[0].outcome, MessageOutcome::Requeued);
        assert_eq!(handled.load(Ordering::Relaxed), 0);
        assert_eq!(engine.stats().snapshot().metadata_requeues, 1);

        // The requeued message comes back with its reply subject intact.
        let report = engine.run_once(&handler).await.unwrap();
        assert_eq!(report.dispositions(), vec![Disposition::Ack]);
        assert_eq!(handled.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_ack_failure_is_surfaced_after_full_batch() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        broker.publish("events.a", "1");
        broker.publish("events.b", "2");
        broker.fault_config().force_ack_fail = true;

        let err = engine.run_once(&fail_on("none")).await.unwrap_err();

        assert!(matches!(err, ConsumerError::Acknowledge { kind: AckKind::Ack, .. }));
        let stats = engine.stats().snapshot();
        assert_eq!(stats.ack_failures, 1);
        assert_eq!(stats.acks, 2);
        assert_eq!(broker.calls().acks_of(AckKind::Ack).len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_error_reports_failure() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        broker.fault_config().force_fetch_fail = true;

        let report = engine.run_once(&fail_on("none")).await.unwrap();

        assert_eq!(report.outcome, BatchOutcome::FetchFailed);
        assert_eq!(engine.stats().snapshot().fetch_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_when_cancelled_while_idle() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            trigger.cancel();
        });

        let outcome = engine.run(&cancel, &fail_on("none")).await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        let stats = engine.stats().snapshot();
        assert!(stats.idle_polls >= 2);
        assert_eq!(stats.backoffs, 0);
        assert_eq!(stats.fetch_errors, 0);
    }

    #[tokio::test]
    async fn test_drain_stops_fetching() {
        let broker = SimulatedBroker::new(42);
        let mut engine = setup(&broker).await;
        engine.drain_handle().request();
        broker.publish("events.a", "1");

        let report = engine.run_once(&fail_on("none")).await.unwrap();

        assert_eq!(report.outcome, BatchOutcome::Drained);
        assert_eq!(engine.stats().snapshot().fetches, 0);
        assert_eq!(broker.calls().fetches, 0);
    }
}
