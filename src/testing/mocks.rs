//! Mock transports and configuration
//!
//! `ScriptedConsumerFactory` hands out connections that replay a fixed
//! sequence of reads (messages and errors) and then wait forever, so tests
//! can drive the loop through failure paths the in-memory broker never takes.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{Config, TransportKind};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::message::{BrokerMessage, ConsumedMessage, Delivery};
use crate::kafka::transport::{BrokerConsumer, BrokerProducer, ConsumerFactory};

/// Returns a Config that runs against the in-memory broker
pub fn mock_config() -> Config {
    let mut config = Config::default();
    config.kafka.transport = TransportKind::Memory;
    config.kafka.shutdown_timeout_ms = 1_000;
    config
}

/// Producer whose sends and close always fail
#[derive(Default)]
pub struct FailingProducer {
    sends: AtomicUsize,
}

impl FailingProducer {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerProducer for FailingProducer {
    async fn send(&self, message: &BrokerMessage) -> Result<Delivery> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Err(KafkaError::BrokerUnavailable {
            topic: message.topic().to_string(),
            cause: "connection refused".to_string(),
        })
    }

    async fn close(&self) -> Result<()> {
        Err(KafkaError::Client("flush failed".to_string()))
    }
}

/// One scripted result of `recv()`
#[derive(Debug, Clone)]
pub enum ScriptedRead {
    Message(ConsumedMessage),
    ReadFailed,
    ConnectionLost,
}

impl ScriptedRead {
    pub fn message(topic: &str, key: &str, value: &str) -> Self {
        ScriptedRead::Message(ConsumedMessage {
            topic: topic.to_string(),
            partition: 0,
            offset: 0,
            key: Bytes::copy_from_slice(key.as_bytes()),
            value: Bytes::copy_from_slice(value.as_bytes()),
        })
    }
}

/// Consumer factory whose connections share one script
#[derive(Clone, Default)]
pub struct ScriptedConsumerFactory {
    script: Arc<Mutex<VecDeque<ScriptedRead>>>,
    connects: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedConsumerFactory {
    pub fn new(script: Vec<ScriptedRead>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into())),
            ..Default::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn closed_connections(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl ConsumerFactory for ScriptedConsumerFactory {
    fn connect(&self, topic: &str, _group_id: &str) -> Result<Box<dyn BrokerConsumer>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConsumer {
            topic: topic.to_string(),
            factory: self.clone(),
        }))
    }
}

struct ScriptedConsumer {
    topic: String,
    factory: ScriptedConsumerFactory,
}

#[async_trait]
impl BrokerConsumer for ScriptedConsumer {
    async fn recv(&mut self) -> Result<ConsumedMessage> {
        let next = self.factory.script.lock().pop_front();
        match next {
            Some(ScriptedRead::Message(msg)) => Ok(msg),
            Some(ScriptedRead::ReadFailed) => Err(KafkaError::ReadFailed {
                topic: self.topic.clone(),
                cause: "scripted read failure".to_string(),
            }),
            Some(ScriptedRead::ConnectionLost) => Err(KafkaError::ConnectionLost {
                topic: self.topic.clone(),
                cause: "scripted connection loss".to_string(),
            }),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.factory.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_config_uses_memory_transport() {
        let config = mock_config();
        assert_eq!(config.kafka.transport, TransportKind::Memory);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_scripted_reads_replay_in_order() {
        let factory = ScriptedConsumerFactory::new(vec![
            ScriptedRead::message("t", "k", "v"),
            ScriptedRead::ReadFailed,
        ]);
        let mut consumer = factory.connect("t", "g").unwrap();

        assert!(consumer.recv().await.is_ok());
        assert!(matches!(
            consumer.recv().await,
            Err(KafkaError::ReadFailed { .. })
        ));
        consumer.close().await.unwrap();
        assert_eq!(factory.connects(), 1);
        assert_eq!(factory.closed_connections(), 1);
    }
}
