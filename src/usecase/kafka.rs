// Kafka use case
//
// The control surface an HTTP layer calls, plus consume_one: a request/response
// bridge over the streaming consumer.
//
// ## consume_one
//
// A transient loop is registered with a handler that fills a single-slot
// result and cancels the loop's token on first delivery. The loop runs as a
// background task while the caller races three outcomes:
//
//   message in the slot      → Ok((key, value))
//   loop failed to start/run → that error
//   caller signal fired      → ConsumeTimeout
//
// Whichever wins, a guard cancels the loop's token, fires the loop's own
// shutdown token and removes the transient registration before returning.
// The loop is registered as transient so start_all never launches it under a
// token this request does not own. The caller does not wait for the loop to
// finish closing its connection.

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kafka::consumer::{handler_fn, ConsumptionLoop, MessageHandler};
use crate::kafka::error::{KafkaError, Result};
use crate::kafka::manager::{KafkaManager, StatusSnapshot};

/// Stops and deregisters a transient loop on every exit path
struct EphemeralGuard<'a> {
    manager: &'a KafkaManager,
    consumer: Arc<ConsumptionLoop>,
    token: CancellationToken,
}

impl Drop for EphemeralGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.consumer.shutdown();
        self.manager.deregister(&self.consumer);
    }
}

/// Handler that keeps the first delivery and cancels `token`
///
/// Later deliveries are dropped.
fn first_delivery_handler(
    topic: &str,
    token: CancellationToken,
) -> (Arc<dyn MessageHandler>, oneshot::Receiver<(Bytes, Bytes)>) {
    let (tx, rx) = oneshot::channel::<(Bytes, Bytes)>();
    let slot = Arc::new(Mutex::new(Some(tx)));
    let topic = topic.to_string();

    let handler = handler_fn(move |key: Bytes, value: Bytes| {
        let sender = slot.lock().take();
        match sender {
            Some(tx) => {
                let _ = tx.send((key, value));
                token.cancel();
            }
            None => debug!(topic = %topic, "Result already taken, dropping message"),
        }
        std::future::ready(Ok(()))
    });

    (handler, rx)
}

/// Control surface over a shared KafkaManager
#[derive(Clone)]
pub struct KafkaUseCase {
    manager: Arc<KafkaManager>,
}

impl KafkaUseCase {
    pub fn new(manager: Arc<KafkaManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<KafkaManager> {
        &self.manager
    }

    /// Publish `value` to `topic` keyed by `key`
    pub async fn produce_message<T>(&self, topic: &str, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.manager.send(topic, key.as_bytes(), value).await?;
        Ok(())
    }

    /// Wait for one message on `topic` as a member of `group_id`
    ///
    /// Returns when a message arrives, when the loop fails, or when `signal`
    /// fires. At most one message is returned; a second delivery to the
    /// transient handler is dropped.
    ///
    /// # Errors
    ///
    /// - `DuplicateConsumer` if another loop is registered for `topic`
    /// - `ConsumptionDisabled` if the consumer gate is closed
    /// - `ConsumeTimeout` if `signal` fires first
    /// - the loop's own error if it fails before a message arrives
    pub async fn consume_one(
        &self,
        topic: &str,
        group_id: &str,
        signal: CancellationToken,
    ) -> Result<(Bytes, Bytes)> {
        let derived = signal.child_token();

        let (handler, msg_rx) = first_delivery_handler(topic, derived.clone());

        let consumer = self.manager.new_transient_loop(topic, group_id, handler);
        self.manager.register_loop(consumer.clone())?;

        let _guard = EphemeralGuard {
            manager: &self.manager,
            consumer: consumer.clone(),
            token: derived.clone(),
        };

        let (done_tx, done_rx) = oneshot::channel::<Result<()>>();
        tokio::spawn({
            let manager = self.manager.clone();
            let token = derived.clone();
            async move {
                let result = manager.start_loop(&consumer, token).await;
                let _ = done_tx.send(result);
            }
        });

        tokio::select! {
            biased;
            Ok(message) = msg_rx => Ok(message),
            Ok(stopped) = done_rx => match stopped {
                Err(e) => Err(e),
                Ok(()) if signal.is_cancelled() => Err(KafkaError::ConsumeTimeout(topic.to_string())),
                // Stopped without a message or a deadline: the manager shut it down
                Ok(()) => Err(KafkaError::ConnectionLost {
                    topic: topic.to_string(),
                    cause: "consumer stopped before a message arrived".to_string(),
                }),
            },
            _ = signal.cancelled() => Err(KafkaError::ConsumeTimeout(topic.to_string())),
        }
    }

    /// consume_one with a deadline instead of a caller-owned signal
    pub async fn consume_one_within(
        &self,
        topic: &str,
        group_id: &str,
        timeout: Duration,
    ) -> Result<(Bytes, Bytes)> {
        let signal = CancellationToken::new();
        let consume = self.consume_one(topic, group_id, signal.clone());
        tokio::pin!(consume);

        tokio::select! {
            result = &mut consume => return result,
            _ = tokio::time::sleep(timeout) => signal.cancel(),
        }

        consume.await
    }

    // ===== Control surface =====

    pub fn enable_producer(&self) {
        self.manager.enable_producer();
    }

    pub fn disable_producer(&self) {
        self.manager.disable_producer();
    }

    pub fn is_producer_enabled(&self) -> bool {
        self.manager.is_producer_enabled()
    }

    pub fn enable_consumer(&self) {
        self.manager.enable_consumer();
    }

    pub fn disable_consumer(&self) {
        self.manager.disable_consumer();
    }

    pub fn is_consumer_enabled(&self) -> bool {
        self.manager.is_consumer_enabled()
    }

    pub fn get_status(&self) -> StatusSnapshot {
        self.manager.status()
    }
}
