//! Audit server orchestration.
//!
//! Connects, reconciles the topology, reports it, then runs the pull engine
//! with the [`EventLogger`] until shutdown. Shutdown drains the subscription
//! first and then cancels the engine; the link is always closed on exit.

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use warden_broker::{Session, Transport};
use warden_consumer::{
    ConsumerConfig, EngineBinding, PullEngine, RunOutcome, Supervisor, TopologyReconciler,
};

use crate::error::{ServerError, ServerResult};
use crate::event_logger::{EventLogMode, EventLogger};
use crate::health::{HealthObserver, HealthState};

/// Runs the audit listener over a transport.
#[derive(Debug)]
pub struct AuditServer {
    config: ConsumerConfig,
    logger: EventLogger,
    health: Arc<HealthState>,
}

impl AuditServer {
    /// Creates a server for a validated configuration.
    #[must_use]
    pub fn new(config: ConsumerConfig, mode: EventLogMode) -> Self {
        Self {
            config,
            logger: EventLogger::new(mode),
            health: Arc::new(HealthState::default()),
        }
    }

    /// Shares `health` with the health endpoint.
    #[must_use]
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = health;
        self
    }

    /// Returns the connection state reported by the health endpoint.
    #[must_use]
    pub fn health(&self) -> Arc<HealthState> {
        Arc::clone(&self.health)
    }

    /// Runs until SIGINT or SIGTERM.
    ///
    /// # Errors
    /// Returns an error if connecting or reconciling fails.
    pub async fn run(&self, transport: &dyn Transport) -> ServerResult<RunOutcome> {
        self.run_until(transport, shutdown_signal()).await
    }

    /// Runs until `shutdown` completes.
    ///
    /// # Errors
    /// Returns an error if connecting or reconciling fails.
    pub async fn run_until<F>(
        &self,
        transport: &dyn Transport,
        shutdown: F,
    ) -> ServerResult<RunOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(address = %self.config.address, "Starting JetStream events audit server");
        let supervisor = Supervisor::connect(
            transport,
            &self.config.address,
            &self.config.connect_options(),
            Arc::new(HealthObserver::new(self.health())),
        )
        .await?;

        let result = self.consume(&supervisor, shutdown).await;
        supervisor.close().await;
        if result.is_ok() {
            info!("JetStream events audit server stopped");
        }
        result
    }

    async fn consume<F>(&self, supervisor: &Supervisor, shutdown: F) -> ServerResult<RunOutcome>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let config = &self.config;
        let session = supervisor.session().session()?;
        let reconciler = TopologyReconciler::new(Arc::clone(&session));
        if config.create_stream {
            reconciler.ensure_stream(&config.stream).await?;
        }
        reconciler
            .ensure_cursor(&config.stream.name, &config.cursor)
            .await?;
        report_topology(session.as_ref(), config).await;

        let binding = EngineBinding::new(&config.stream.name, &config.cursor.durable_name);
        let mut engine =
            PullEngine::bind(supervisor.session_cell(), binding, config.pull_config()).await?;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let drain = engine.drain_handle();
        let watcher = tokio::spawn(async move {
            shutdown.await;
            info!("Received shutdown signal, initiating graceful shutdown");
            drain.request();
            trigger.cancel();
        });

        info!(
            subject = %config.cursor.subject,
            stream = %config.stream.name,
            consumer = %config.cursor.description,
            durable = %config.cursor.durable_name,
            "Starting to listen for JetStream events"
        );
        let outcome = engine.run(&cancel, &self.logger).await;
        watcher.abort();

        let stats = engine.stats().snapshot();
        info!(
            fetches = stats.fetches,
            acks = stats.acks,
            retries = stats.retries,
            terminals = stats.terminals,
            fetch_errors = stats.fetch_errors,
            "Pull engine finished"
        );
        outcome.map_err(ServerError::from)
    }
}

/// Logs the stream and cursor state. Lookup failures are not fatal here.
async fn report_topology(session: &dyn Session, config: &ConsumerConfig) {
    match session.stream_info(&config.stream.name).await {
        Ok(info) => info!(
            stream = %info.spec.name,
            subject = %info.spec.subject,
            messages = info.state.messages,
            bytes = info.state.bytes,
            consumers = info.state.cursor_count,
            "JetStream stream information"
        ),
        Err(e) => debug!(error = %e, "Stream information unavailable"),
    }

    match session
        .cursor_info(&config.stream.name, &config.cursor.durable_name)
        .await
    {
        Ok(info) => info!(
            consumer = %info.config.description,
            durable = %info.config.durable_name,
            delivered = %info.delivered,
            ack_pending = info.num_ack_pending,
            redelivered = info.num_redelivered,
            pending = info.num_pending,
            "JetStream consumer information"
        ),
        Err(e) => debug!(error = %e, "Consumer information unavailable"),
    }
}

/// Completes on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Received SIGINT"),
        () = terminate => info!("Received SIGTERM"),
    }
}
