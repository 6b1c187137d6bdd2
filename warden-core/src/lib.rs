//! Warden Core - Value objects and delivery metadata for Warden.
//!
//! This crate provides the broker-independent vocabulary of the consumer:
//! the desired stream and durable cursor specifications, the delivery
//! metadata carried by every fetched message, subject-pattern handling and
//! the per-message disposition decision. It performs no I/O.
//!
//! # Design Principles (`TigerStyle`)
//!
//! - **Strongly-typed sequences**: Prevent mixing up stream and cursor sequences
//! - **Explicit defaults**: Every tunable has a named default in [`defaults`]
//! - **Explicit enums**: Broker policies are named variants, never magic numbers
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod defaults;
mod error;
mod metadata;
mod spec;
pub mod subject;
mod types;

pub use error::{CoreError, CoreResult};
pub use metadata::DeliveryMetadata;
pub use spec::{
    AckMode, DeliverPolicy, DeliveryMode, DiscardPolicy, DurableCursorSpec, ReplayPolicy,
    RetentionLimits, RetentionPolicy, StorageClass, StreamSpec,
};
pub use types::{CursorSequence, Disposition, SessionGeneration, StreamSequence};
