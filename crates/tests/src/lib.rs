//! Integration Tests for the Verity Client
//!
//! This crate contains various test modules:
//!
//! - `client_scenario_tests`: End-to-end calls against scripted honest, lying,
//!   lagging and unresponsive nodes
//! - `proof_property_tests`: Property tests that tampered proofs never verify
//! - `registry_tests`: Node selection and reputation
//! - `cache_and_persistence_tests`: Response cache, snapshots and layered config
//! - `mock_infrastructure`: Reusable mock chain, trie and transport
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --package tests
//! ```
//!
//! No network access is needed: every node is a closure behind
//! `ScriptedTransport`, answering from a `MockChain` whose headers and state
//! tries are real, so responses go through the same verifier as production
//! traffic.

#[cfg(test)]
mod client_scenario_tests;

#[cfg(test)]
mod proof_property_tests;

#[cfg(test)]
mod registry_tests;

#[cfg(test)]
mod cache_and_persistence_tests;

/// Mock infrastructure for testing
pub mod mock_infrastructure;
