// In-memory broker
//
// A Kafka-shaped log that lives in the process: topics are created on first
// use with a fixed number of partitions, keyed messages are routed with the
// same murmur2 partitioner the rdkafka producer uses, and consumer groups
// track committed offsets per (group, topic, partition).
//
// ## Delivery
//
// Members of one group share the group's offsets: a read claims the next
// record of a partition and commits past it under the same lock, so each
// record reaches exactly one member of each group. Groups start at the
// earliest offset.
//
// ## Wakeups
//
// Readers with nothing to claim park on the topic's Notify. A produce wakes
// every parked reader of that topic, and each re-checks the log. The claim
// happens without an await in between, so dropping recv() loses nothing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

use super::constants::DEFAULT_MEMORY_PARTITIONS;
use super::error::{KafkaError, Result};
use super::message::{BrokerMessage, ConsumedMessage, Delivery};
use super::partitioner::compute_partition;
use super::transport::{BrokerConsumer, BrokerProducer, ConsumerFactory};

/// Key for a group's position in one partition
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
struct GroupPartitionKey {
    group_id: String,
    topic: String,
    partition: i32,
}

impl GroupPartitionKey {
    fn new(group_id: &str, topic: &str, partition: i32) -> Self {
        Self {
            group_id: group_id.to_string(),
            topic: topic.to_string(),
            partition,
        }
    }
}

/// Partition logs and committed offsets
#[derive(Default)]
struct LogState {
    /// topic -> partition -> records (offset == index)
    topics: HashMap<String, Vec<Vec<ConsumedMessage>>>,
    /// next offset each group will read
    committed: HashMap<GroupPartitionKey, i64>,
}

/// Per-topic wakeup handles for parked readers
#[derive(Default)]
struct TopicWaiters {
    inner: Mutex<HashMap<String, Arc<Notify>>>,
}

impl TopicWaiters {
    fn handle(&self, topic: &str) -> Arc<Notify> {
        self.inner
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn notify_topic(&self, topic: &str) {
        if let Some(notify) = self.inner.lock().get(topic) {
            notify.notify_waiters();
        }
    }

    fn notify_all(&self) {
        for notify in self.inner.lock().values() {
            notify.notify_waiters();
        }
    }
}

struct Inner {
    partitions: i32,
    log: Mutex<LogState>,
    waiters: TopicWaiters,
    produced: AtomicU64,
    unavailable: AtomicBool,
    shut_down: AtomicBool,
}

/// In-process broker implementing both transport seams
///
/// Cheap to clone; clones share the same log.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_MEMORY_PARTITIONS)
    }

    /// Create a broker whose topics get `partitions` partitions each
    pub fn with_partitions(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                log: Mutex::new(LogState::default()),
                waiters: TopicWaiters::default(),
                produced: AtomicU64::new(0),
                unavailable: AtomicBool::new(false),
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub fn partition_count(&self) -> i32 {
        self.inner.partitions
    }

    /// Number of messages accepted since creation
    pub fn produced_count(&self) -> u64 {
        self.inner.produced.load(Ordering::Acquire)
    }

    /// Every record of a topic, partition by partition, in offset order
    pub fn messages(&self, topic: &str) -> Vec<ConsumedMessage> {
        let log = self.inner.log.lock();
        log.topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Next offset `group_id` will read from a partition
    pub fn committed_offset(&self, group_id: &str, topic: &str, partition: i32) -> i64 {
        let log = self.inner.log.lock();
        log.committed
            .get(&GroupPartitionKey::new(group_id, topic, partition))
            .copied()
            .unwrap_or(0)
    }

    /// Simulate an outage: sends fail and reads return transient errors
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Release);
        if !unavailable {
            self.inner.waiters.notify_all();
        }
    }

    /// Take the broker down for good; open consumers report a lost connection
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        self.inner.waiters.notify_all();
        debug!("Memory broker shut down");
    }

    fn is_unavailable(&self) -> bool {
        self.inner.unavailable.load(Ordering::Acquire)
    }

    fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    fn append(&self, message: &BrokerMessage) -> Delivery {
        let topic = message.topic();
        let partition = compute_partition(message.partition_key(), self.inner.partitions);

        let offset = {
            let mut log = self.inner.log.lock();
            let partitions = log
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.inner.partitions as usize]);
            let records = &mut partitions[partition as usize];
            let offset = records.len() as i64;
            records.push(ConsumedMessage {
                topic: topic.to_string(),
                partition,
                offset,
                key: message.key().clone(),
                value: message.value().clone(),
            });
            offset
        };

        self.inner.produced.fetch_add(1, Ordering::AcqRel);
        self.inner.waiters.notify_topic(topic);

        Delivery { partition, offset }
    }

    /// Claim the next unread record for a group, starting the scan at `start`
    fn claim(&self, group_id: &str, topic: &str, start: usize) -> Option<ConsumedMessage> {
        let mut log = self.inner.log.lock();
        let LogState { topics, committed } = &mut *log;
        let partitions = topics.get(topic)?;

        let count = partitions.len();
        for i in 0..count {
            let partition = (start + i) % count;
            let key = GroupPartitionKey::new(group_id, topic, partition as i32);
            let next = committed.get(&key).copied().unwrap_or(0);

            if let Some(record) = partitions[partition].get(next as usize) {
                let record = record.clone();
                committed.insert(key, next + 1);
                return Some(record);
            }
        }
        None
    }
}

#[async_trait]
impl BrokerProducer for MemoryBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<Delivery> {
        if self.is_shut_down() || self.is_unavailable() {
            return Err(KafkaError::BrokerUnavailable {
                topic: message.topic().to_string(),
                cause: "memory broker is not accepting writes".to_string(),
            });
        }
        Ok(self.append(message))
    }

    async fn close(&self) -> Result<()> {
        // Appends are synchronous; nothing is ever in flight
        Ok(())
    }
}

impl ConsumerFactory for MemoryBroker {
    fn connect(&self, topic: &str, group_id: &str) -> Result<Box<dyn BrokerConsumer>> {
        if self.is_shut_down() {
            return Err(KafkaError::Client(format!(
                "memory broker is shut down, cannot subscribe to {}",
                topic
            )));
        }

        debug!(topic = %topic, group_id = %group_id, "Memory consumer subscribed");

        Ok(Box::new(MemoryConsumer {
            broker: self.clone(),
            topic: topic.to_string(),
            group_id: group_id.to_string(),
            next_partition: 0,
            closed: false,
        }))
    }
}

/// A group member reading one topic of a MemoryBroker
pub struct MemoryConsumer {
    broker: MemoryBroker,
    topic: String,
    group_id: String,
    /// Rotates so one busy partition cannot starve the others
    next_partition: usize,
    closed: bool,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn recv(&mut self) -> Result<ConsumedMessage> {
        let notify = self.broker.inner.waiters.handle(&self.topic);

        loop {
            // Register before checking so a produce in between is not missed
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed || self.broker.is_shut_down() {
                return Err(KafkaError::ConnectionLost {
                    topic: self.topic.clone(),
                    cause: "memory broker connection closed".to_string(),
                });
            }
            if self.broker.is_unavailable() {
                return Err(KafkaError::ReadFailed {
                    topic: self.topic.clone(),
                    cause: "memory broker unavailable".to_string(),
                });
            }

            if let Some(record) =
                self.broker
                    .claim(&self.group_id, &self.topic, self.next_partition)
            {
                self.next_partition = (record.partition as usize + 1)
                    % self.broker.partition_count() as usize;
                return Ok(record);
            }

            notified.await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        debug!(topic = %self.topic, group_id = %self.group_id, "Memory consumer closed");
        Ok(())
    }
}
