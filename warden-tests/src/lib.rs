//! Warden Tests - Deterministic Simulation Testing for Warden.
//!
//! This crate contains the DST and integration tests that span more than one
//! Warden crate. Every test runs against `SimulatedBroker`, so no broker
//! process is needed.
//!
//! ## Test Organization
//!
//! **DST Tests** (`*_dst.rs`): Deterministic simulation with fault injection
//! - `engine_dst`: Pull engine over a flaky broker, one run per regression seed
//!
//! **Integration Tests** (`*_tests.rs`): Multi-component integration
//! - `reconcile_tests`: Stream and cursor reconciliation against live state
//! - `engine_tests`: Delivery, retry and termination through a supervisor
//! - `reconnect_tests`: Session re-derivation and engine re-binding
//! - `server_tests`: `AuditServer` end to end
//!
//! **Support Modules**:
//! - `scenarios`: Harness, scripted handler and regression seeds
//!
//! ## Naming Conventions
//!
//! - DST tests: `test_dst_<component>_<scenario>`
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod scenarios;

// DST test modules (deterministic simulation with fault injection).
#[cfg(test)]
mod engine_dst;

#[cfg(test)]
mod reconnect_tests;
