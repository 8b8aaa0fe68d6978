//! kafka_ctl: a runtime-controlled Kafka control plane
//!
//! Sits between application code and a Kafka-compatible broker and adds:
//! - runtime enable/disable gates for publishing and consumption
//! - a registry of per-topic consumption loops, started one at a time or all at once
//! - a "consume exactly one message" request/response adapter on top of the
//!   streaming consumer
//!
//! ```text
//! KafkaUseCase / KafkaEventUseCase
//!     │
//!     └──> KafkaManager (ControlFlags + registry)
//!              │
//!              ├──> Producer ──> BrokerProducer (rdkafka | memory)
//!              │
//!              └──> ConsumptionLoop ──> ConsumerFactory (rdkafka | memory)
//! ```

pub mod config;
pub mod kafka;
pub mod telemetry;
pub mod usecase;

// Test utilities (only compiled in test builds)
#[cfg(test)]
pub mod testing;

pub use config::Config;
pub use kafka::{KafkaError, KafkaManager, Result, StatusSnapshot};
pub use usecase::{KafkaEventUseCase, KafkaUseCase};
