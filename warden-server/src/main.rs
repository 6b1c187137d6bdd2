//! Warden audit listener binary.
//!
//! Consumes events from a NATS `JetStream` stream through a durable pull
//! cursor and logs each one:
//!
//! ```bash
//! warden --audit nats --nats-addr nats://localhost:4222 --subject 'events.>'
//! ```
//!
//! With `--audit nope` (the default) the process logs that auditing is
//! disabled and exits successfully.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use warden_broker::NatsTransport;
use warden_server::cli::{AuditBackend, Args};
use warden_server::health::{self, HealthState};
use warden_server::{logging, AuditServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init(&args.log_level, args.log_format)?;

    if args.audit == AuditBackend::Nope {
        info!("Audit is disabled, exiting");
        return Ok(());
    }

    let config = args.consumer_config()?;
    info!(
        address = %config.address,
        stream = %config.stream.name,
        durable = %config.cursor.durable_name,
        health_addr = %args.health_addr,
        event_log_mode = ?args.event_log_mode,
        "Starting Warden audit listener"
    );

    let health_state = Arc::new(HealthState::default());
    let health_shutdown = CancellationToken::new();
    let health_task = tokio::spawn(health::serve(
        args.health_addr,
        Arc::clone(&health_state),
        health_shutdown.clone(),
    ));

    let server = AuditServer::new(config, args.event_log_mode).with_health(health_state);
    let result = server.run(&NatsTransport).await;

    health_shutdown.cancel();
    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Health endpoint failed"),
        Err(e) => error!(error = %e, "Health endpoint task ended abnormally"),
    }

    result?;
    Ok(())
}
