//! Producer
//!
//! Encodes application values and publishes them through a `BrokerProducer`.
//! The producer knows nothing about the control flags; the manager checks the
//! producer gate before calling in here.

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use super::codec::encode_value;
use super::error::Result;
use super::message::{BrokerMessage, Delivery};
use super::transport::BrokerProducer;

/// Publishes encoded messages to the broker
#[derive(Clone)]
pub struct Producer {
    transport: Arc<dyn BrokerProducer>,
}

impl Producer {
    pub fn new(transport: Arc<dyn BrokerProducer>) -> Self {
        Self { transport }
    }

    /// Encode `value` and publish it to `topic`, waiting for the acknowledgment
    ///
    /// An empty `key` publishes without a key, leaving the partition choice to
    /// the transport.
    ///
    /// # Errors
    ///
    /// - `Encode` if the value cannot be serialized (nothing is sent)
    /// - `BrokerUnavailable` / `WriteTimeout` from the transport
    pub async fn send<T>(&self, topic: &str, key: &[u8], value: &T) -> Result<Delivery>
    where
        T: Serialize + ?Sized,
    {
        let payload = encode_value(value)?;
        let message = BrokerMessage::new(topic, bytes::Bytes::copy_from_slice(key), payload);

        let start = Instant::now();
        match self.transport.send(&message).await {
            Ok(delivery) => {
                info!(
                    topic = %topic,
                    key = %String::from_utf8_lossy(key),
                    partition = delivery.partition,
                    offset = delivery.offset,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Message sent"
                );
                Ok(delivery)
            }
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to send message");
                Err(e)
            }
        }
    }

    /// Flush and release the transport
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::error::KafkaError;
    use crate::kafka::memory::MemoryBroker;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_send_encodes_json() {
        let broker = MemoryBroker::with_partitions(1);
        let producer = Producer::new(Arc::new(broker.clone()));

        let delivery = producer
            .send("greetings", b"k1", "Hello Kafka!")
            .await
            .unwrap();
        assert_eq!(delivery.offset, 0);

        let stored = broker.messages("greetings");
        assert_eq!(stored.len(), 1);
        assert_eq!(&stored[0].key[..], b"k1");
        assert_eq!(&stored[0].value[..], b"\"Hello Kafka!\"");
    }

    #[tokio::test]
    async fn test_unencodable_value_is_not_sent() {
        let broker = MemoryBroker::new();
        let producer = Producer::new(Arc::new(broker.clone()));

        let mut bad = HashMap::new();
        bad.insert(vec![0u8], 1);

        let result = producer.send("greetings", b"k", &bad).await;
        assert!(matches!(result, Err(KafkaError::Encode(_))));
        assert_eq!(broker.produced_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_returned() {
        let broker = MemoryBroker::new();
        broker.set_unavailable(true);
        let producer = Producer::new(Arc::new(broker));

        let result = producer.send("greetings", b"", &42).await;
        match result {
            Err(KafkaError::BrokerUnavailable { topic, .. }) => assert_eq!(topic, "greetings"),
            other => panic!("expected BrokerUnavailable, got {:?}", other),
        }
    }
}
