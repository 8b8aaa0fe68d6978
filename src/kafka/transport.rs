// Transport abstraction layer
//
// This module defines the traits that separate the control plane from the
// broker client. By keeping rdkafka behind these seams we get:
// 1. Testability - the manager and loops run against the in-memory broker
// 2. A development mode that needs no running cluster
// 3. One place (broker.rs) that knows about librdkafka error codes

use async_trait::async_trait;

use super::error::Result;
use super::message::{BrokerMessage, ConsumedMessage, Delivery};

/// Publishes messages to the broker
///
/// Implementations must route messages with equal keys to the same partition
/// and must not retry on their own beyond what the client library does.
#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Publish one message and wait for the broker acknowledgment
    ///
    /// # Errors
    ///
    /// `BrokerUnavailable` or `WriteTimeout` with the underlying cause.
    async fn send(&self, message: &BrokerMessage) -> Result<Delivery>;

    /// Flush anything still in flight and release the connection
    async fn close(&self) -> Result<()>;
}

/// One broker-consumer connection, subscribed to a single topic
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait for the next message
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no
    /// message.
    ///
    /// # Errors
    ///
    /// `ConnectionLost` when the connection cannot be used any more,
    /// `ReadFailed` for errors the next read may recover from.
    async fn recv(&mut self) -> Result<ConsumedMessage>;

    /// Release the connection (leave the group, stop fetching)
    async fn close(&mut self) -> Result<()>;
}

/// Opens consumer connections for consumption loops
pub trait ConsumerFactory: Send + Sync {
    /// Open a connection for `topic` as a member of `group_id`
    fn connect(&self, topic: &str, group_id: &str) -> Result<Box<dyn BrokerConsumer>>;
}
