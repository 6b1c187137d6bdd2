//! Warden Broker - Broker session abstraction for Warden.
//!
//! This crate defines the seams between the consumer and a JetStream-style
//! broker: a [`Transport`] opens a [`Link`], a link derives [`Session`]s, a
//! session manages streams and durable cursors and opens
//! [`PullSubscription`]s, and every fetched message carries its own
//! [`Acker`].
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Deterministic testing**: `SimulatedBroker` enables fault injection
//! - **Owned acknowledgment**: Each message acks on its own channel, so a
//!   replaced session never strands in-flight messages
//! - **No unsafe code**: Safety > Performance
//!
//! # Broker Backends
//!
//! - [`SimulatedTransport`]: In-memory broker with fault injection for DST
//! - `NatsTransport`: Production NATS `JetStream` backend (behind `nats` feature flag)
//!
//! # Example
//!
//! ```ignore
//! use warden_broker::{ConnectOptions, SimulatedBroker, SimulatedTransport, Transport};
//! use warden_core::StreamSpec;
//!
//! let broker = SimulatedBroker::new(42);
//! let transport = SimulatedTransport::new(broker.clone());
//! let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
//!
//! let link = transport.connect("sim://local", &ConnectOptions::default(), tx).await?;
//! let session = link.derive_session().await?;
//! session.create_stream(&StreamSpec::default()).await?;
//! broker.publish("events.user.created", b"{}".as_slice());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod info;
mod message;
#[cfg(feature = "nats")]
mod nats;
mod session;
mod simulated;

pub use error::{BrokerError, BrokerResult};
pub use info::{CursorConfig, CursorInfo, StreamInfo, StreamState};
pub use message::{AckKind, Acker, FetchedMessage};
#[cfg(feature = "nats")]
pub use nats::NatsTransport;
pub use session::{
    ConnectOptions, FetchRequest, Link, LinkEvent, LinkEventSender, PullSubscription, Session,
    Transport,
};
pub use simulated::{
    AckRecord, BrokerFaultConfig, CallLog, SimulatedBroker, SimulatedLink, SimulatedTransport,
};
