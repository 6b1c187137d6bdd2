//! Warden audit listener.
//!
//! Wires the pull consumer to an operator-facing process: command-line and
//! environment configuration, log subscriber setup, a `/health` endpoint and
//! the [`EventLogger`] handler that writes every consumed event to the log.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Explicit limits**: every tunable has a named default
//! - **Fail fast at startup**: invalid arguments and topology errors exit
//!   non-zero; nothing is retried
//! - **Graceful shutdown**: drain the subscription, then cancel the engine
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
mod error;
pub mod event_logger;
pub mod health;
pub mod logging;
mod server;

pub use error::{ServerError, ServerResult};
pub use event_logger::{describe, Event, EventLogMode, EventLogger, EventRecord};
pub use server::{shutdown_signal, AuditServer};
