//! Test handlers
//!
//! Handlers that record what they were given so tests can wait for a number
//! of deliveries and then assert on contents and order.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::Notify;

use crate::kafka::consumer::MessageHandler;

/// How long a test waits for deliveries before failing
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Wait until `ready()` holds, re-checking whenever `notify` fires
async fn wait_until(notify: &Notify, ready: impl Fn() -> bool) {
    let wait = async {
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if ready() {
                return;
            }
            notified.await;
        }
    };

    tokio::time::timeout(WAIT_TIMEOUT, wait)
        .await
        .expect("timed out waiting for handler deliveries");
}

/// Records every (key, value) it receives
#[derive(Default)]
pub struct RecordingHandler {
    messages: Mutex<Vec<(Bytes, Bytes)>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the deliveries so far, in handling order
    pub fn messages(&self) -> Vec<(Bytes, Bytes)> {
        self.messages.lock().clone()
    }

    /// Wait until at least `count` messages were handled
    pub async fn wait_for(&self, count: usize) {
        wait_until(&self.notify, || self.messages.lock().len() >= count).await;
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, key: Bytes, value: Bytes) -> anyhow::Result<()> {
        self.messages.lock().push((key, value));
        self.notify.notify_waiters();
        Ok(())
    }
}

/// Fails on chosen call numbers (0-based), succeeds otherwise
pub struct FailingHandler {
    fail_on: HashSet<usize>,
    calls: Mutex<usize>,
    notify: Notify,
}

impl FailingHandler {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_on: calls.iter().copied().collect(),
            calls: Mutex::new(0),
            notify: Notify::new(),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock()
    }

    /// Wait until the handler was invoked `count` times
    pub async fn wait_for_calls(&self, count: usize) {
        wait_until(&self.notify, || *self.calls.lock() >= count).await;
    }
}

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _key: Bytes, value: Bytes) -> anyhow::Result<()> {
        let call = {
            let mut calls = self.calls.lock();
            let call = *calls;
            *calls += 1;
            call
        };
        self.notify.notify_waiters();

        if self.fail_on.contains(&call) {
            anyhow::bail!(
                "rejected message {} ({})",
                call,
                String::from_utf8_lossy(&value)
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_handler_records_in_order() {
        let handler = RecordingHandler::new();
        handler
            .handle(Bytes::from_static(b"a"), Bytes::from_static(b"1"))
            .await
            .unwrap();
        handler
            .handle(Bytes::from_static(b"b"), Bytes::from_static(b"2"))
            .await
            .unwrap();

        handler.wait_for(2).await;
        let messages = handler.messages();
        assert_eq!(&messages[0].0[..], b"a");
        assert_eq!(&messages[1].1[..], b"2");
    }

    #[tokio::test]
    async fn test_failing_handler_fails_on_selected_calls() {
        let handler = FailingHandler::failing_on(&[1]);
        assert!(handler.handle(Bytes::new(), Bytes::new()).await.is_ok());
        assert!(handler.handle(Bytes::new(), Bytes::new()).await.is_err());
        assert!(handler.handle(Bytes::new(), Bytes::new()).await.is_ok());
        assert_eq!(handler.calls(), 3);
    }
}
