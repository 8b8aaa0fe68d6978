// Kafka control plane
//
// KafkaManager composes the Producer and the consumer registry and puts both
// behind runtime flags.
//
// ## Gates
//
// The flags are checked once at the call boundary (send, start_one,
// start_all). Disabling the consumer does not stop loops that are already
// running; it only rejects new starts.
//
// ## Locking
//
// ControlFlags and the registry are the only shared mutable state. Both are
// parking_lot RwLocks and neither is held across an await: callers copy out
// what they need (a flag value, an Arc to a loop) and release the lock before
// doing I/O. status() takes the flags lock and then the registry lock, and no
// other path takes them in the opposite order.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{RdKafkaConsumerFactory, RdKafkaProducer};
use super::consumer::{ConsumptionLoop, LoopState, MessageHandler};
use super::error::{KafkaError, Result};
use super::memory::MemoryBroker;
use super::message::Delivery;
use super::producer::Producer;
use super::transport::{BrokerProducer, ConsumerFactory};
use crate::config::{KafkaConfig, TransportKind};

/// Both flags, always read and written together
#[derive(Debug, Clone, Copy)]
struct FlagState {
    producer_enabled: bool,
    consumer_enabled: bool,
}

/// Runtime enable/disable switches for producing and consuming
///
/// Every read and write goes through one lock, so a reader sees either the
/// state before a flip or the state after it.
#[derive(Debug)]
pub struct ControlFlags {
    state: RwLock<FlagState>,
}

impl ControlFlags {
    pub fn new(producer_enabled: bool, consumer_enabled: bool) -> Self {
        Self {
            state: RwLock::new(FlagState {
                producer_enabled,
                consumer_enabled,
            }),
        }
    }

    pub fn set_producer(&self, enabled: bool) {
        self.state.write().producer_enabled = enabled;
    }

    pub fn set_consumer(&self, enabled: bool) {
        self.state.write().consumer_enabled = enabled;
    }

    pub fn is_producer_enabled(&self) -> bool {
        self.state.read().producer_enabled
    }

    pub fn is_consumer_enabled(&self) -> bool {
        self.state.read().consumer_enabled
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new(true, true)
    }
}

/// One registered loop as seen by status()
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerStatus {
    pub topic: String,
    pub group_id: String,
    pub state: LoopState,
    pub processed: u64,
    pub failed: u64,
}

/// Point-in-time view of the control plane
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub producer_enabled: bool,
    pub consumer_enabled: bool,
    pub brokers: Vec<String>,
    /// Number of registered loops
    pub consumer_count: usize,
    /// Registered loops currently reading
    pub running_count: usize,
    /// Sorted by topic
    pub consumers: Vec<ConsumerStatus>,
}

impl StatusSnapshot {
    pub fn producer_message(&self) -> &'static str {
        if self.producer_enabled {
            "Kafka producer is enabled and can send messages"
        } else {
            "Kafka producer is disabled and cannot send messages"
        }
    }

    pub fn consumer_message(&self) -> &'static str {
        if self.consumer_enabled {
            "Kafka consumer is enabled and can receive messages"
        } else {
            "Kafka consumer is disabled and cannot receive messages"
        }
    }
}

type LoopResult = (String, Result<()>);

/// The control plane: gated producer plus a registry of consumption loops
pub struct KafkaManager {
    producer: Producer,
    factory: Arc<dyn ConsumerFactory>,
    brokers: Vec<String>,
    flags: ControlFlags,
    /// topic -> loop; at most one loop per topic
    registry: RwLock<HashMap<String, Arc<ConsumptionLoop>>>,
    /// Loops launched by start_all
    tasks: Mutex<JoinSet<LoopResult>>,
    shutdown_timeout: Duration,
}

impl KafkaManager {
    /// Create a manager with both producing and consuming enabled
    pub fn new(
        brokers: Vec<String>,
        producer: Arc<dyn BrokerProducer>,
        factory: Arc<dyn ConsumerFactory>,
    ) -> Self {
        Self::with_flags(brokers, producer, factory, true, true)
    }

    /// Create a manager with the given process-start flag values
    pub fn with_flags(
        brokers: Vec<String>,
        producer: Arc<dyn BrokerProducer>,
        factory: Arc<dyn ConsumerFactory>,
        producer_enabled: bool,
        consumer_enabled: bool,
    ) -> Self {
        Self {
            producer: Producer::new(producer),
            factory,
            brokers,
            flags: ControlFlags::new(producer_enabled, consumer_enabled),
            registry: RwLock::new(HashMap::new()),
            tasks: Mutex::new(JoinSet::new()),
            shutdown_timeout: Duration::from_millis(
                super::constants::DEFAULT_SHUTDOWN_TIMEOUT_MS,
            ),
        }
    }

    /// Create a manager over an in-memory broker
    pub fn in_memory(broker: MemoryBroker) -> Self {
        Self::new(
            vec!["memory".to_string()],
            Arc::new(broker.clone()),
            Arc::new(broker),
        )
    }

    /// Build transports and flags from configuration
    ///
    /// # Errors
    ///
    /// Returns `KafkaError::Client` if the rdkafka producer cannot be created.
    pub fn from_config(config: &KafkaConfig) -> Result<Self> {
        let (producer, factory): (Arc<dyn BrokerProducer>, Arc<dyn ConsumerFactory>) =
            match config.transport {
                TransportKind::Kafka => (
                    Arc::new(RdKafkaProducer::new(config)?),
                    Arc::new(RdKafkaConsumerFactory::new(config)),
                ),
                TransportKind::Memory => {
                    let broker = MemoryBroker::new();
                    (Arc::new(broker.clone()), Arc::new(broker))
                }
            };

        info!(
            brokers = %config.bootstrap_servers(),
            transport = config.transport.as_str(),
            producer_enabled = config.control.producer_enabled,
            consumer_enabled = config.control.consumer_enabled,
            "Kafka manager initialized"
        );

        Ok(Self::with_flags(
            config.brokers.clone(),
            producer,
            factory,
            config.control.producer_enabled,
            config.control.consumer_enabled,
        )
        .with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// How long close() waits for loops started by start_all
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn brokers(&self) -> &[String] {
        &self.brokers
    }

    // ===== Producer =====

    /// Publish `value` to `topic` if the producer gate is open
    ///
    /// # Errors
    ///
    /// `ProductionDisabled` without touching the transport, otherwise whatever
    /// the Producer returns.
    pub async fn send<T>(&self, topic: &str, key: &[u8], value: &T) -> Result<Delivery>
    where
        T: serde::Serialize + ?Sized,
    {
        if !self.flags.is_producer_enabled() {
            debug!(topic = %topic, "Send rejected: producer disabled");
            return Err(KafkaError::ProductionDisabled);
        }

        self.producer.send(topic, key, value).await
    }

    // ===== Registry =====

    /// Register a handler for `topic` as a member of `group_id`
    ///
    /// # Errors
    ///
    /// `DuplicateConsumer` if the topic already has a loop; the existing
    /// registration is left untouched.
    pub fn register(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        self.register_loop(self.new_loop(topic, group_id, handler))
    }

    /// Build a loop bound to this manager's consumer factory
    pub(crate) fn new_loop(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Arc<ConsumptionLoop> {
        Arc::new(ConsumptionLoop::new(
            topic,
            group_id,
            handler,
            self.factory.clone(),
        ))
    }

    /// Build a loop that `start_all` leaves to its owner
    pub(crate) fn new_transient_loop(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Arc<ConsumptionLoop> {
        Arc::new(
            ConsumptionLoop::new(topic, group_id, handler, self.factory.clone()).into_transient(),
        )
    }

    pub(crate) fn register_loop(&self, consumer: Arc<ConsumptionLoop>) -> Result<()> {
        let mut registry = self.registry.write();

        if registry.contains_key(consumer.topic()) {
            return Err(KafkaError::DuplicateConsumer(consumer.topic().to_string()));
        }

        debug!(
            topic = %consumer.topic(),
            group_id = %consumer.group_id(),
            "Consumer registered"
        );
        registry.insert(consumer.topic().to_string(), consumer);
        Ok(())
    }

    /// Remove `consumer` if it is still the loop registered for its topic
    pub(crate) fn deregister(&self, consumer: &Arc<ConsumptionLoop>) -> bool {
        let mut registry = self.registry.write();

        match registry.get(consumer.topic()) {
            Some(current) if Arc::ptr_eq(current, consumer) => {
                registry.remove(consumer.topic());
                debug!(topic = %consumer.topic(), "Consumer deregistered");
                true
            }
            _ => false,
        }
    }

    pub fn is_registered(&self, topic: &str) -> bool {
        self.registry.read().contains_key(topic)
    }

    pub fn consumer_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Registered topics, sorted
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.registry.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    // ===== Starting loops =====

    /// Run the loop registered for `topic` until `cancel` fires
    ///
    /// This future is the loop; it resolves when the loop stops.
    ///
    /// # Errors
    ///
    /// `ConsumptionDisabled`, `NotRegistered`, or the loop's own error.
    pub async fn start_one(&self, topic: &str, cancel: CancellationToken) -> Result<()> {
        if !self.flags.is_consumer_enabled() {
            debug!(topic = %topic, "Start rejected: consumer disabled");
            return Err(KafkaError::ConsumptionDisabled);
        }

        let consumer = self
            .registry
            .read()
            .get(topic)
            .cloned()
            .ok_or_else(|| KafkaError::NotRegistered(topic.to_string()))?;

        consumer.start(cancel).await
    }

    /// Start `consumer` directly, subject to the consumer gate
    pub(crate) async fn start_loop(
        &self,
        consumer: &ConsumptionLoop,
        cancel: CancellationToken,
    ) -> Result<()> {
        if !self.flags.is_consumer_enabled() {
            debug!(topic = %consumer.topic(), "Start rejected: consumer disabled");
            return Err(KafkaError::ConsumptionDisabled);
        }
        consumer.start(cancel).await
    }

    /// Launch every registered loop as its own task
    ///
    /// Each loop gets a child of `cancel`, so it can be stopped alone or all
    /// together. Transient loops belong to the request that registered them
    /// and are skipped. With the consumer gate closed this logs a warning and
    /// starts nothing. Returns the number of loops launched.
    pub fn start_all(&self, cancel: &CancellationToken) -> usize {
        if !self.flags.is_consumer_enabled() {
            warn!("Kafka consumer is disabled, skipping start of all consumers");
            return 0;
        }

        let consumers: Vec<Arc<ConsumptionLoop>> = self
            .registry
            .read()
            .values()
            .filter(|c| !c.is_transient())
            .cloned()
            .collect();

        let mut tasks = self.tasks.lock();
        for consumer in &consumers {
            let consumer = consumer.clone();
            let token = cancel.child_token();
            tasks.spawn(async move {
                let result = consumer.start(token).await;
                if let Err(e) = &result {
                    error!(
                        topic = %consumer.topic(),
                        error = %e,
                        "Consumer stopped with error"
                    );
                }
                (consumer.topic().to_string(), result)
            });
        }

        info!(count = consumers.len(), "Started all consumers");
        consumers.len()
    }

    // ===== Control flags =====

    pub fn enable_producer(&self) {
        self.flags.set_producer(true);
        info!("Kafka producer enabled");
    }

    pub fn disable_producer(&self) {
        self.flags.set_producer(false);
        info!("Kafka producer disabled");
    }

    pub fn is_producer_enabled(&self) -> bool {
        self.flags.is_producer_enabled()
    }

    pub fn enable_consumer(&self) {
        self.flags.set_consumer(true);
        info!("Kafka consumer enabled");
    }

    pub fn disable_consumer(&self) {
        self.flags.set_consumer(false);
        info!("Kafka consumer disabled");
    }

    pub fn is_consumer_enabled(&self) -> bool {
        self.flags.is_consumer_enabled()
    }

    /// Flags, brokers and registered loops read at one point in time
    pub fn status(&self) -> StatusSnapshot {
        let flags = self.flags.state.read();
        let registry = self.registry.read();

        let mut consumers: Vec<ConsumerStatus> = registry
            .values()
            .map(|c| ConsumerStatus {
                topic: c.topic().to_string(),
                group_id: c.group_id().to_string(),
                state: c.state(),
                processed: c.processed_count(),
                failed: c.failed_count(),
            })
            .collect();
        consumers.sort_by(|a, b| a.topic.cmp(&b.topic));

        StatusSnapshot {
            producer_enabled: flags.producer_enabled,
            consumer_enabled: flags.consumer_enabled,
            brokers: self.brokers.clone(),
            consumer_count: registry.len(),
            running_count: consumers
                .iter()
                .filter(|c| c.state == LoopState::Running)
                .count(),
            consumers,
        }
    }

    // ===== Shutdown =====

    /// Stop every loop, close the producer and clear the registry
    ///
    /// Teardown is best effort: every step runs even if an earlier one failed,
    /// and the first error is returned.
    pub async fn close(&self) -> Result<()> {
        let mut first_error: Option<KafkaError> = None;

        let consumers: Vec<Arc<ConsumptionLoop>> =
            self.registry.write().drain().map(|(_, c)| c).collect();
        for consumer in &consumers {
            debug!(
                topic = %consumer.topic(),
                state = consumer.state().as_str(),
                "Shutting down consumer"
            );
            consumer.shutdown();
        }

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let waited = tokio::time::timeout(self.shutdown_timeout, async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((topic, Ok(()))) => debug!(topic = %topic, "Consumer task finished"),
                    Ok((topic, Err(e))) => {
                        debug!(topic = %topic, error = %e, "Consumer task finished with error")
                    }
                    Err(e) => error!(error = %e, "Consumer task panicked"),
                }
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "Consumers did not stop in time, aborting"
            );
            tasks.abort_all();
            first_error.get_or_insert(KafkaError::ShutdownTimeout(
                self.shutdown_timeout.as_millis() as u64,
            ));
        }

        if let Err(e) = self.producer.close().await {
            error!(error = %e, "Failed to close producer");
            first_error.get_or_insert(e);
        }

        info!(consumers = consumers.len(), "Kafka manager closed");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for KafkaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaManager")
            .field("brokers", &self.brokers)
            .field("flags", &self.flags)
            .field("topics", &self.topics())
            .finish()
    }
}
