//! Consumption loop
//!
//! One `ConsumptionLoop` per (topic, consumer group). It opens its own broker
//! connection when started, reads messages one at a time and hands each to the
//! registered `MessageHandler`.
//!
//! ## Failure isolation
//!
//! A handler error is logged with topic and group context and the loop moves
//! on to the next message. Read errors are split by the transport:
//! `ConnectionLost` stops the loop and is returned to whoever started it,
//! anything else is logged and retried after a short back-off.
//!
//! ## Cancellation
//!
//! `start` takes a `CancellationToken`. The loop also owns a private shutdown
//! token that the manager fires on close. Either one stops the loop between
//! reads; a handler that is already running finishes first.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::constants::READ_ERROR_BACKOFF_MS;
use super::error::{KafkaError, Result};
use super::message::ConsumedMessage;
use super::transport::{BrokerConsumer, ConsumerFactory};

/// Processes messages delivered by a consumption loop
///
/// Handlers receive the raw key and value and decode them with their own
/// schema. Returning an error never stops the loop.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, key: Bytes, value: Bytes) -> anyhow::Result<()>;
}

/// Adapter turning an async closure into a `MessageHandler`
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Bytes, Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, key: Bytes, value: Bytes) -> anyhow::Result<()> {
        (self.0)(key, value).await
    }
}

/// Wrap a closure as a shareable handler
///
/// ```ignore
/// let handler = handler_fn(|key, value| async move {
///     println!("{:?} => {:?}", key, value);
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Bytes, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Lifecycle of a consumption loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    /// Registered, never started
    Created,
    /// Reading from the broker
    Running,
    /// Cancelled, shut down or failed; may be started again
    Stopped,
}

impl LoopState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopState::Created => "created",
            LoopState::Running => "running",
            LoopState::Stopped => "stopped",
        }
    }
}

/// Sets the loop back to Stopped however `start` exits, including when its
/// future is dropped or its task aborted
struct RunningGuard<'a> {
    state: &'a Mutex<LoopState>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = LoopState::Stopped;
    }
}

/// A per-topic consumption loop
pub struct ConsumptionLoop {
    topic: String,
    group_id: String,
    handler: Arc<dyn MessageHandler>,
    factory: Arc<dyn ConsumerFactory>,
    state: Mutex<LoopState>,
    /// Fired by the manager on close
    shutdown: CancellationToken,
    /// Owned by a single request; never launched by `start_all`
    transient: bool,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl ConsumptionLoop {
    pub fn new(
        topic: impl Into<String>,
        group_id: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
        factory: Arc<dyn ConsumerFactory>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            handler,
            factory,
            state: Mutex::new(LoopState::Created),
            shutdown: CancellationToken::new(),
            transient: false,
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Mark the loop as owned by one caller rather than the manager
    pub fn into_transient(mut self) -> Self {
        self.transient = true;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn state(&self) -> LoopState {
        *self.state.lock()
    }

    /// Messages the handler accepted
    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Messages the handler rejected
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Stop the loop for good, regardless of the token it was started with
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run until `cancel` fires, the loop is shut down, or the connection is lost
    ///
    /// Returns `Ok(())` on cancellation.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if another `start` on this loop has not returned
    /// - `Client` if the broker connection cannot be opened
    /// - `ConnectionLost` if the connection fails while reading
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        let _running = {
            let mut state = self.state.lock();
            if *state == LoopState::Running {
                return Err(KafkaError::AlreadyRunning(self.topic.clone()));
            }
            *state = LoopState::Running;
            RunningGuard { state: &self.state }
        };

        let mut connection = self.factory.connect(&self.topic, &self.group_id)?;

        info!(topic = %self.topic, group_id = %self.group_id, "Consumption loop started");

        let outcome = self.run(&mut *connection, &cancel).await;

        if let Err(e) = connection.close().await {
            warn!(
                topic = %self.topic,
                group_id = %self.group_id,
                error = %e,
                "Failed to close consumer connection"
            );
        }

        match &outcome {
            Ok(()) => info!(topic = %self.topic, group_id = %self.group_id, "Consumption loop stopped"),
            Err(e) => error!(
                topic = %self.topic,
                group_id = %self.group_id,
                error = %e,
                "Consumption loop failed"
            ),
        }

        outcome
    }

    async fn run(
        &self,
        connection: &mut dyn BrokerConsumer,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let backoff = Duration::from_millis(READ_ERROR_BACKOFF_MS);

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = self.shutdown.cancelled() => return Ok(()),
                read = connection.recv() => read,
            };

            match read {
                Ok(message) => self.dispatch(message).await,
                Err(e) if e.is_fatal_read() => return Err(e),
                Err(e) => {
                    warn!(
                        topic = %self.topic,
                        group_id = %self.group_id,
                        error = %e,
                        "Transient read error, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        _ = self.shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: ConsumedMessage) {
        debug!(
            topic = %message.topic,
            group_id = %self.group_id,
            partition = message.partition,
            offset = message.offset,
            key = %String::from_utf8_lossy(&message.key),
            "Message received"
        );

        match self.handler.handle(message.key, message.value).await {
            Ok(()) => {
                self.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    topic = %self.topic,
                    group_id = %self.group_id,
                    partition = message.partition,
                    offset = message.offset,
                    error = %format!("{:#}", e),
                    "Message handler failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for ConsumptionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumptionLoop")
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::memory::MemoryBroker;
    use crate::kafka::transport::BrokerProducer;
    use crate::kafka::message::BrokerMessage;
    use crate::testing::{FailingHandler, RecordingHandler, ScriptedConsumerFactory, ScriptedRead};

    async fn publish(broker: &MemoryBroker, topic: &str, key: &str, value: &str) {
        let msg = BrokerMessage::new(
            topic,
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        );
        broker.send(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_delivers_messages_in_order() {
        let broker = MemoryBroker::with_partitions(1);
        let handler = Arc::new(RecordingHandler::new());
        let lp = Arc::new(ConsumptionLoop::new(
            "orders",
            "g",
            handler.clone(),
            Arc::new(broker.clone()),
        ));

        for i in 0..5 {
            publish(&broker, "orders", "k", &format!("m{}", i)).await;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let lp = lp.clone();
            let cancel = cancel.clone();
            async move { lp.start(cancel).await }
        });

        handler.wait_for(5).await;
        assert_eq!(lp.state(), LoopState::Running);

        cancel.cancel();
        task.await.unwrap().unwrap();

        let values: Vec<String> = handler
            .messages()
            .into_iter()
            .map(|(_, v)| String::from_utf8(v.to_vec()).unwrap())
            .collect();
        assert_eq!(values, vec!["m0", "m1", "m2", "m3", "m4"]);
        assert_eq!(lp.state(), LoopState::Stopped);
        assert_eq!(lp.processed_count(), 5);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_stop_loop() {
        let broker = MemoryBroker::with_partitions(1);
        // Fail on the second message only
        let handler = Arc::new(FailingHandler::failing_on(&[1]));
        let lp = Arc::new(ConsumptionLoop::new(
            "orders",
            "g",
            handler.clone(),
            Arc::new(broker.clone()),
        ));

        for i in 0..3 {
            publish(&broker, "orders", "k", &i.to_string()).await;
        }

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let lp = lp.clone();
            let cancel = cancel.clone();
            async move { lp.start(cancel).await }
        });

        handler.wait_for_calls(3).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(lp.processed_count(), 2);
        assert_eq!(lp.failed_count(), 1);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_running() {
        let broker = MemoryBroker::new();
        let lp = Arc::new(ConsumptionLoop::new(
            "orders",
            "g",
            Arc::new(RecordingHandler::new()),
            Arc::new(broker),
        ));

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let lp = lp.clone();
            let cancel = cancel.clone();
            async move { lp.start(cancel).await }
        });

        while lp.state() != LoopState::Running {
            tokio::task::yield_now().await;
        }

        let second = lp.start(CancellationToken::new()).await;
        assert!(matches!(second, Err(KafkaError::AlreadyRunning(_))));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_loop_can_restart() {
        let broker = MemoryBroker::with_partitions(1);
        let handler = Arc::new(RecordingHandler::new());
        let lp = ConsumptionLoop::new("orders", "g", handler.clone(), Arc::new(broker.clone()));

        let cancel = CancellationToken::new();
        cancel.cancel();
        lp.start(cancel).await.unwrap();
        assert_eq!(lp.state(), LoopState::Stopped);

        publish(&broker, "orders", "k", "after-restart").await;
        let cancel = CancellationToken::new();
        let run = lp.start(cancel.clone());
        tokio::pin!(run);

        tokio::select! {
            _ = &mut run => panic!("loop exited early"),
            _ = handler.wait_for(1) => {}
        }
        cancel.cancel();
        run.await.unwrap();

        assert_eq!(handler.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_connection_lost_stops_loop_with_error() {
        let factory = ScriptedConsumerFactory::new(vec![
            ScriptedRead::message("orders", "k", "v"),
            ScriptedRead::ConnectionLost,
        ]);
        let handler = Arc::new(RecordingHandler::new());
        let lp = ConsumptionLoop::new("orders", "g", handler.clone(), Arc::new(factory.clone()));

        let result = lp.start(CancellationToken::new()).await;

        assert!(matches!(result, Err(KafkaError::ConnectionLost { .. })));
        assert_eq!(handler.messages().len(), 1);
        assert_eq!(lp.state(), LoopState::Stopped);
        assert_eq!(factory.closed_connections(), 1);
    }

    #[tokio::test]
    async fn test_transient_read_error_is_retried() {
        let factory = ScriptedConsumerFactory::new(vec![
            ScriptedRead::ReadFailed,
            ScriptedRead::message("orders", "k", "after-error"),
        ]);
        let handler = Arc::new(RecordingHandler::new());
        let lp = Arc::new(ConsumptionLoop::new(
            "orders",
            "g",
            handler.clone(),
            Arc::new(factory),
        ));

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let lp = lp.clone();
            let cancel = cancel.clone();
            async move { lp.start(cancel).await }
        });

        handler.wait_for(1).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        assert_eq!(&handler.messages()[0].1[..], b"after-error");
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_loop() {
        let broker = MemoryBroker::new();
        let lp = Arc::new(ConsumptionLoop::new(
            "orders",
            "g",
            Arc::new(RecordingHandler::new()),
            Arc::new(broker),
        ));

        let task = tokio::spawn({
            let lp = lp.clone();
            async move { lp.start(CancellationToken::new()).await }
        });

        while lp.state() != LoopState::Running {
            tokio::task::yield_now().await;
        }
        lp.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("loop should stop on shutdown")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_loop_stopped() {
        let broker = MemoryBroker::new();
        broker.shutdown();
        let lp = ConsumptionLoop::new("orders", "g", Arc::new(RecordingHandler::new()), Arc::new(broker));

        let result = lp.start(CancellationToken::new()).await;
        assert!(matches!(result, Err(KafkaError::Client(_))));
        assert_eq!(lp.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_handler_fn_adapter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = handler_fn({
            let seen = seen.clone();
            move |key: Bytes, _value: Bytes| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(key);
                    Ok(())
                }
            }
        });

        handler
            .handle(Bytes::from_static(b"k"), Bytes::new())
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 1);
    }
}
