//! Durable, at-least-once pull consumer for Warden.
//!
//! This crate turns a broker [`Transport`](warden_broker::Transport) into a
//! running consumer:
//!
//! - **Connection supervisor**: [`Supervisor`] owns the link, derives a
//!   session, re-derives it after every reconnect and publishes it through
//!   a [`SessionCell`].
//! - **Topology reconciler**: [`TopologyReconciler`] makes the stream and
//!   durable cursor match the desired specs.
//! - **Pull engine**: [`PullEngine`] fetches bounded-wait batches, dispatches
//!   each message to a [`MessageHandler`] and acknowledges it according to
//!   its disposition.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Explicit limits**: batch size bounds in-flight work, every wait is
//!   bounded, the backoff is fixed
//! - **Fail fast at startup**: connection, session and topology errors are
//!   fatal; loop errors are logged and never abort
//! - **Single writer**: only the supervisor replaces the session
//! - **No unsafe code**: Safety > Performance
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use warden_consumer::{
//!     handler_fn, ConsumerConfig, EngineBinding, PullEngine, Supervisor,
//!     TopologyReconciler, TracingObserver,
//! };
//!
//! let config = ConsumerConfig::default();
//! let supervisor = Supervisor::connect(
//!     &transport,
//!     &config.address,
//!     &config.connect_options(),
//!     Arc::new(TracingObserver),
//! ).await?;
//!
//! let reconciler = TopologyReconciler::new(supervisor.session().session()?);
//! reconciler.ensure_stream(&config.stream).await?;
//! reconciler.ensure_cursor(&config.stream.name, &config.cursor).await?;
//!
//! let binding = EngineBinding::new(&config.stream.name, &config.cursor.durable_name);
//! let mut engine = PullEngine::bind(supervisor.session_cell(), binding, config.pull_config()).await?;
//! engine.run(&cancel, &handler_fn(|_msg, _meta| Ok(()))).await?;
//! supervisor.close().await;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod engine;
mod error;
mod handler;
mod reconciler;
mod session_cell;
mod supervisor;

// Re-export public API.
pub use config::{ConsumerConfig, PullConfig};
pub use engine::{
    BatchOutcome, BatchReport, DispatchRecord, DrainHandle, EngineBinding, EngineStats,
    EngineStatsSnapshot, MessageOutcome, PullEngine, RunOutcome,
};
pub use error::{ConsumerError, ConsumerResult};
pub use handler::{handler_fn, FnHandler, HandlerError, HandlerErrorKind, MessageHandler};
pub use reconciler::{CursorOutcome, StreamOutcome, TopologyReconciler};
pub use session_cell::{SessionCell, SessionSlot, SessionState};
pub use supervisor::{LifecycleEvent, LifecycleObserver, Supervisor, TracingObserver};
