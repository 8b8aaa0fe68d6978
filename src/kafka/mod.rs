// Kafka control plane module
//
// This module contains everything between the application and the broker:
// - Transport seams (producer / consumer traits) and their implementations
// - The Producer send path
// - Per-topic consumption loops
// - The manager that gates both behind runtime flags
//
// Architecture Overview:
// =====================
//
// Application code never talks to rdkafka directly. It goes through the
// KafkaManager, which checks the ControlFlags at the call boundary and then
// delegates:
//
//   send()      → [producer gate] → Producer → BrokerProducer
//   start_one() → [consumer gate] → registry lookup → ConsumptionLoop::start
//   start_all() → [consumer gate] → one tokio task per registered loop
//
// The transport traits let the same control plane run against a real
// cluster (broker.rs) or the in-process log (memory.rs).

pub mod broker;
pub mod codec;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod manager;
pub mod memory;
pub mod message;
pub mod partitioner;
pub mod producer;
pub mod transport;

// Re-export commonly used types for convenience
pub use broker::{RdKafkaConsumerFactory, RdKafkaProducer};
pub use consumer::{handler_fn, ConsumptionLoop, LoopState, MessageHandler};
pub use error::{ErrorFault, KafkaError, Result};
pub use manager::{ConsumerStatus, ControlFlags, KafkaManager, StatusSnapshot};
pub use memory::MemoryBroker;
pub use message::{BrokerMessage, ConsumedMessage, Delivery};
pub use producer::Producer;
pub use transport::{BrokerConsumer, BrokerProducer, ConsumerFactory};
