//! Testing utilities for kafka_ctl
//!
//! Test doubles for the seams the control plane depends on. Only compiled
//! when running tests.
//!
//! # Organization
//! - `helpers.rs` - Message handlers that record, fail or block on demand
//! - `mocks.rs` - Scripted and failing transports, a memory-backed config

#![cfg(test)]

pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use helpers::{FailingHandler, RecordingHandler};
pub use mocks::{mock_config, FailingProducer, ScriptedConsumerFactory, ScriptedRead};
