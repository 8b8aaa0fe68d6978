//! Message types flowing through the control plane

use bytes::Bytes;
use std::time::SystemTime;

/// An outbound message, built by the Producer at send time
///
/// Fields are private so the message cannot change after construction.
#[derive(Debug, Clone)]
pub struct BrokerMessage {
    topic: String,
    key: Bytes,
    value: Bytes,
    produced_at: SystemTime,
}

impl BrokerMessage {
    /// Create a message stamped with the current time
    pub fn new(topic: impl Into<String>, key: Bytes, value: Bytes) -> Self {
        Self {
            topic: topic.into(),
            key,
            value,
            produced_at: SystemTime::now(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    /// Key for partitioning; an empty key means "no key"
    pub fn partition_key(&self) -> Option<&[u8]> {
        if self.key.is_empty() {
            None
        } else {
            Some(&self.key[..])
        }
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn produced_at(&self) -> SystemTime {
        self.produced_at
    }

    /// Milliseconds since the Unix epoch, as Kafka record timestamps are expressed
    pub fn timestamp_millis(&self) -> i64 {
        self.produced_at
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Where the broker stored an acknowledged message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// A message read from the broker by a consumption loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    /// Topic the message was read from
    pub topic: String,
    /// Partition ID
    pub partition: i32,
    /// Partition offset
    pub offset: i64,
    /// Message key (empty when the producer sent none)
    pub key: Bytes,
    /// Message value (empty for tombstones)
    pub value: Bytes,
}
