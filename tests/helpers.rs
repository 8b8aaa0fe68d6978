// Test helpers for kafka_ctl integration tests
//
// Handlers that forward deliveries into channels, so tests can await a number
// of messages with a deadline instead of sleeping.

#![allow(dead_code)]

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use kafka_ctl::kafka::{handler_fn, KafkaManager, MemoryBroker, MessageHandler};

/// Default deadline for waiting on deliveries
pub const WAIT: Duration = Duration::from_secs(5);

pub type Delivered = (Bytes, Bytes);

/// A manager over a fresh in-memory broker
pub fn memory_manager(partitions: i32) -> (Arc<KafkaManager>, MemoryBroker) {
    let broker = MemoryBroker::with_partitions(partitions);
    (Arc::new(KafkaManager::in_memory(broker.clone())), broker)
}

/// Handler that forwards every delivery to a channel
pub fn channel_handler() -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<Delivered>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |key: Bytes, value: Bytes| {
        let _ = tx.send((key, value));
        std::future::ready(Ok(()))
    });
    (handler, rx)
}

/// Handler that forwards every delivery but reports failure for call `fail_at`
pub fn failing_channel_handler(
    fail_at: usize,
) -> (Arc<dyn MessageHandler>, mpsc::UnboundedReceiver<Delivered>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    let handler = handler_fn(move |key: Bytes, value: Bytes| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let _ = tx.send((key, value));
        let result = if call == fail_at {
            Err(anyhow::anyhow!("handler rejected message {}", call))
        } else {
            Ok(())
        };
        std::future::ready(result)
    });
    (handler, rx)
}

/// Receive exactly `count` deliveries or panic after `WAIT`
pub async fn recv_n(rx: &mut mpsc::UnboundedReceiver<Delivered>, count: usize) -> Vec<Delivered> {
    tokio::time::timeout(WAIT, async {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            match rx.recv().await {
                Some(d) => out.push(d),
                None => break,
            }
        }
        out
    })
    .await
    .expect("timed out waiting for deliveries")
}

/// Decode a JSON string payload produced with a &str value
pub fn text(value: &Bytes) -> String {
    serde_json::from_slice(value).expect("payload should be a JSON string")
}
