//! rdkafka transport
//!
//! This module provides the production implementations of the transport
//! traits: a `FutureProducer` for publishing and one `StreamConsumer` per
//! consumption loop.
//!
//! ## Error mapping
//!
//! librdkafka errors never leave this module. They are classified by error
//! code and rendered to text:
//! - produce timeouts become `WriteTimeout`, everything else `BrokerUnavailable`
//! - fatal client errors and cancellation become `ConnectionLost`, which
//!   stops the consumption loop; other read errors become `ReadFailed`
//!
//! ## OpenSSL Warning
//!
//! This uses system OpenSSL via librdkafka. The `ssl-vendored` feature is not
//! enabled.

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError as RdKafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer as _};
use rdkafka::util::Timeout;
use rdkafka::Message;
use std::time::Duration;
use tracing::{debug, info};

use super::constants::{PRODUCER_ACKS, PRODUCER_PARTITIONER};
use super::error::{KafkaError, Result};
use super::message::{BrokerMessage, ConsumedMessage, Delivery};
use super::transport::{BrokerConsumer, BrokerProducer, ConsumerFactory};
use crate::config::{KafkaConfig, SecurityConfig};

/// Apply security protocol, SASL and SSL settings to a client config
fn apply_security(client_config: &mut ClientConfig, security: &SecurityConfig) {
    // Security protocol (SASL_SSL, SASL_PLAINTEXT, SSL, PLAINTEXT)
    client_config.set("security.protocol", &security.protocol);

    if security.protocol.starts_with("SASL") {
        client_config.set("sasl.mechanism", &security.sasl_mechanism);

        if !security.sasl_username.is_empty() {
            client_config.set("sasl.username", &security.sasl_username);
        }

        if !security.sasl_password.is_empty() {
            client_config.set("sasl.password", &security.sasl_password);
        }
    }

    if security.protocol.ends_with("SSL") {
        if !security.ssl_ca_location.is_empty() {
            client_config.set("ssl.ca.location", &security.ssl_ca_location);
        }

        // Enable hostname verification for security
        client_config.set("ssl.endpoint.identification.algorithm", "https");
    }
}

fn client_id(role: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("kafka-ctl-{}-{}", role, &id[..8])
}

/// Build the librdkafka settings for the producer
pub(crate) fn producer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config.set("bootstrap.servers", config.bootstrap_servers());
    client_config.set("client.id", client_id("producer"));
    apply_security(&mut client_config, &config.security);

    // One replica acknowledges; murmur2 keeps equal keys on one partition
    // and spreads unkeyed messages randomly
    client_config.set("acks", PRODUCER_ACKS);
    client_config.set("partitioner", PRODUCER_PARTITIONER);

    client_config.set(
        "message.timeout.ms",
        config.producer.message_timeout_ms.to_string(),
    );
    client_config.set(
        "request.timeout.ms",
        config.producer.request_timeout_ms.to_string(),
    );

    client_config
}

/// Build the librdkafka settings shared by every consumer connection
///
/// `group.id` is set per connection.
pub(crate) fn consumer_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config.set("bootstrap.servers", config.bootstrap_servers());
    client_config.set("client.id", client_id("consumer"));
    apply_security(&mut client_config, &config.security);

    client_config.set(
        "session.timeout.ms",
        config.consumer.session_timeout_ms.to_string(),
    );
    client_config.set("auto.offset.reset", &config.consumer.auto_offset_reset);
    client_config.set("fetch.min.bytes", config.consumer.fetch_min_bytes.to_string());
    client_config.set("fetch.max.bytes", config.consumer.fetch_max_bytes.to_string());
    client_config.set("enable.partition.eof", "false");

    client_config
}

/// Classify a produce failure
fn classify_produce_error(topic: &str, err: RdKafkaError) -> KafkaError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut)
        | Some(RDKafkaErrorCode::RequestTimedOut)
        | Some(RDKafkaErrorCode::OperationTimedOut) => KafkaError::WriteTimeout {
            topic: topic.to_string(),
            cause: err.to_string(),
        },
        _ => KafkaError::BrokerUnavailable {
            topic: topic.to_string(),
            cause: err.to_string(),
        },
    }
}

/// Classify a read failure
///
/// librdkafka reconnects to brokers on its own, so only errors that leave the
/// client unusable end the loop.
fn classify_read_error(topic: &str, err: RdKafkaError) -> KafkaError {
    let fatal = matches!(err, RdKafkaError::Canceled)
        || err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal);

    if fatal {
        KafkaError::ConnectionLost {
            topic: topic.to_string(),
            cause: err.to_string(),
        }
    } else {
        KafkaError::ReadFailed {
            topic: topic.to_string(),
            cause: err.to_string(),
        }
    }
}

/// Producer backed by rdkafka's FutureProducer
pub struct RdKafkaProducer {
    producer: FutureProducer,
    /// How long send() may wait for room in the local queue
    queue_timeout: Duration,
    /// How long close() waits for in-flight messages
    flush_timeout: Duration,
}

impl RdKafkaProducer {
    /// Create a producer from configuration
    ///
    /// No connection is made here; librdkafka connects lazily on first send.
    ///
    /// # Errors
    ///
    /// Returns `KafkaError::Client` if librdkafka rejects the settings.
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = producer_client_config(config)
            .create()
            .map_err(|e| KafkaError::Client(format!("Failed to create producer: {}", e)))?;

        info!(
            brokers = %config.bootstrap_servers(),
            security_protocol = %config.security.protocol,
            "Kafka producer created"
        );

        Ok(Self {
            producer,
            queue_timeout: Duration::from_millis(config.producer.message_timeout_ms),
            flush_timeout: config.shutdown_timeout(),
        })
    }
}

#[async_trait]
impl BrokerProducer for RdKafkaProducer {
    async fn send(&self, message: &BrokerMessage) -> Result<Delivery> {
        let topic = message.topic();

        let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(topic)
            .payload(&message.value()[..])
            .timestamp(message.timestamp_millis());

        if let Some(k) = message.partition_key() {
            record = record.key(k);
        }

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(err, _)| classify_produce_error(topic, err))?;

        Ok(Delivery { partition, offset })
    }

    async fn close(&self) -> Result<()> {
        // flush blocks the calling thread until the queue drains
        let producer = self.producer.clone();
        let timeout = self.flush_timeout;

        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| KafkaError::Client(format!("Flush task failed: {}", e)))?
            .map_err(|e| KafkaError::Client(format!("Flush failed: {}", e)))?;

        debug!("Kafka producer flushed");
        Ok(())
    }
}

impl std::fmt::Debug for RdKafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaProducer")
            .field("queue_timeout", &self.queue_timeout)
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}

/// Opens one rdkafka StreamConsumer per consumption loop
#[derive(Clone)]
pub struct RdKafkaConsumerFactory {
    base: ClientConfig,
}

impl RdKafkaConsumerFactory {
    pub fn new(config: &KafkaConfig) -> Self {
        Self {
            base: consumer_client_config(config),
        }
    }
}

impl ConsumerFactory for RdKafkaConsumerFactory {
    fn connect(&self, topic: &str, group_id: &str) -> Result<Box<dyn BrokerConsumer>> {
        let mut client_config = self.base.clone();
        client_config.set("group.id", group_id);

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| KafkaError::Client(format!("Failed to create consumer: {}", e)))?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| KafkaError::Client(format!("Failed to subscribe to {}: {}", topic, e)))?;

        debug!(topic = %topic, group_id = %group_id, "Kafka consumer subscribed");

        Ok(Box::new(RdKafkaConsumer {
            consumer,
            topic: topic.to_string(),
        }))
    }
}

/// One subscribed StreamConsumer
pub struct RdKafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
}

#[async_trait]
impl BrokerConsumer for RdKafkaConsumer {
    async fn recv(&mut self) -> Result<ConsumedMessage> {
        // StreamConsumer::recv is cancel-safe
        let msg = self
            .consumer
            .recv()
            .await
            .map_err(|e| classify_read_error(&self.topic, e))?;

        Ok(ConsumedMessage {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key: Bytes::copy_from_slice(msg.key().unwrap_or_default()),
            value: Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
        })
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "Kafka consumer unsubscribed");
        Ok(())
    }
}
