//! Simulated broker for deterministic simulation testing.

mod broker;
mod faults;
mod link;

pub use broker::{AckRecord, CallLog, SimulatedBroker};
pub use faults::BrokerFaultConfig;
pub use link::{SimulatedLink, SimulatedTransport};
