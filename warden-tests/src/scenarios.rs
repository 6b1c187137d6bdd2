//! Reusable fixtures for Warden simulation.
//!
//! A [`Harness`] is a consumer wired to a [`SimulatedBroker`] the way the
//! server wires it: supervisor, reconciled topology, bound pull engine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use warden_broker::{FetchedMessage, SimulatedBroker, SimulatedLink, SimulatedTransport};
use warden_consumer::{
    ConsumerConfig, ConsumerResult, EngineBinding, HandlerError, MessageHandler, PullEngine,
    Supervisor, TopologyReconciler, TracingObserver,
};
use warden_core::{DeliveryMetadata, DurableCursorSpec};

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];
}

/// Stream name used by every scenario.
pub const STREAM: &str = "EVENTS";

/// Durable cursor name used by every scenario.
pub const DURABLE: &str = "events-audit-durable";

/// Returns a test configuration with short waits and the given ack deadline.
#[must_use]
pub fn config(ack_wait: Duration) -> ConsumerConfig {
    ConsumerConfig::for_testing()
        .with_cursor(DurableCursorSpec::default().with_ack_wait(ack_wait))
        .with_max_wait(Duration::from_millis(50))
        .with_fetch_backoff(Duration::from_millis(100))
}

/// A connected consumer over a simulated broker.
pub struct Harness {
    /// The broker.
    pub broker: SimulatedBroker,
    /// The transport the supervisor connected through.
    pub transport: SimulatedTransport,
    /// The supervisor.
    pub supervisor: Supervisor,
    /// The bound engine.
    pub engine: PullEngine,
}

impl Harness {
    /// Connects, reconciles the stream and cursor, and binds the engine.
    ///
    /// # Errors
    /// Returns the first startup error.
    pub async fn start(broker: SimulatedBroker, config: &ConsumerConfig) -> ConsumerResult<Self> {
        let transport = SimulatedTransport::new(broker.clone());
        let supervisor = Supervisor::connect(
            &transport,
            &config.address,
            &config.connect_options(),
            Arc::new(TracingObserver),
        )
        .await?;

        let reconciler = TopologyReconciler::new(supervisor.session().session()?);
        reconciler.ensure_stream(&config.stream).await?;
        reconciler
            .ensure_cursor(&config.stream.name, &config.cursor)
            .await?;

        let engine = PullEngine::bind(
            supervisor.session_cell(),
            EngineBinding::new(&config.stream.name, &config.cursor.durable_name),
            config.pull_config(),
        )
        .await?;

        Ok(Self {
            broker,
            transport,
            supervisor,
            engine,
        })
    }

    /// Returns the link the supervisor holds.
    ///
    /// # Panics
    /// Panics if the transport never connected.
    #[must_use]
    pub fn link(&self) -> SimulatedLink {
        self.transport.last_link().expect("harness is connected")
    }

    /// Drops and restores the connection, then lets the supervisor react.
    pub async fn bounce(&self) {
        let link = self.link();
        link.drop_connection();
        link.restore_connection();
        settle().await;
    }
}

/// Yields long enough for the supervisor's event task to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// One handler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Subject of the message.
    pub subject: String,
    /// Stream sequence.
    pub stream_sequence: u64,
    /// Delivery count.
    pub delivered: u64,
}

type FailurePlan = Box<dyn Fn(&Call) -> bool + Send + Sync>;

/// Handler that records every call and fails according to a plan.
pub struct ScriptedHandler {
    fails: FailurePlan,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedHandler {
    /// Creates a handler that fails whenever `fails` returns true.
    pub fn new<F>(fails: F) -> Self
    where
        F: Fn(&Call) -> bool + Send + Sync + 'static,
    {
        Self {
            fails: Box::new(fails),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates a handler that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::new(|_| false)
    }

    /// Returns every call so far.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the calls for one stream sequence.
    #[must_use]
    pub fn calls_for(&self, stream_sequence: u64) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.stream_sequence == stream_sequence)
            .collect()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    async fn handle(
        &self,
        message: &FetchedMessage,
        metadata: &DeliveryMetadata,
    ) -> Result<(), HandlerError> {
        let call = Call {
            subject: message.subject.clone(),
            stream_sequence: metadata.stream_sequence.get(),
            delivered: metadata.delivered,
        };
        let fail = (self.fails)(&call);
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if fail {
            Err(HandlerError::new("scripted failure"))
        } else {
            Ok(())
        }
    }
}
