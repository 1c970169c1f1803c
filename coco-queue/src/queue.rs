use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use coco_core::CocoError;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex, Notify};
use tracing::{debug, warn};

/// The sentinel key that signals the worker to exit its consumer loop. It
/// carries no associated rendezvous slot.
pub const SHUTDOWN_KEY: &str = "coco_shutdown";

/// One queued invocation: the original HTTP request, captured at enqueue
/// time, identified by a process-unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub key: String,
    pub method: String,
    pub endpoint: String,
    pub request_body: Value,
    pub params: String,
    pub received_timestamp: f64,
}

impl QueueEntry {
    pub fn is_shutdown_signal(&self) -> bool {
        self.key == SHUTDOWN_KEY
    }
}

/// The result a worker hands back to a waiting frontend handler.
pub type QueueResult = (u16, Value);

/// A FIFO of [`QueueEntry`] values with a blocking dequeue and a per-entry
/// rendezvous slot pair (modelled here as a single `oneshot` channel
/// delivering `(status, body)` together, preserving the "status observed
/// implies body is ready" ordering the two-slot design exists for).
#[async_trait]
pub trait Queue: Send + Sync {
    /// Atomically check the length bound and append `entry`. Returns the
    /// receiving half of the rendezvous, or `CocoError::CheckFailure` if
    /// the queue is full (mapped to a 503 by the frontend).
    async fn enqueue(
        &self,
        method: String,
        endpoint: String,
        request_body: Value,
        params: String,
    ) -> Result<(String, oneshot::Receiver<QueueResult>), CocoError>;

    /// Block until an entry is available, or `None` if the shutdown
    /// sentinel was popped.
    async fn dequeue(&self) -> Option<QueueEntry>;

    /// Deliver a completed result to whichever handler is awaiting `key`.
    /// A no-op if the handler already gave up (frontend timeout).
    fn complete(&self, key: &str, status: u16, body: Value);

    /// Push the shutdown sentinel so the next `dequeue` call returns `None`.
    async fn shutdown(&self);

    /// Number of requests dropped for `endpoint` due to a full queue.
    fn dropped_count(&self, endpoint: &str) -> u64;
}

/// An in-process queue backed by a `tokio::sync::Mutex`-guarded `VecDeque`,
/// suitable for the single-binary deployment mode (§5's worker runs as an
/// independent task connected to the frontend only through this trait).
pub struct InMemoryQueue {
    capacity: usize,
    fifo: Mutex<VecDeque<QueueEntry>>,
    notify: Notify,
    pending: DashMap<String, oneshot::Sender<QueueResult>>,
    dropped: DashMap<String, AtomicU64>,
    seq: AtomicU64,
}

impl InMemoryQueue {
    /// `capacity = 0` means unbounded, matching `queue_length: 0` in config.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            fifo: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            pending: DashMap::new(),
            dropped: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    fn next_key(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("{}-{now}-{seq}", std::process::id())
    }
}

#[async_trait]
impl Queue for InMemoryQueue {
    async fn enqueue(
        &self,
        method: String,
        endpoint: String,
        request_body: Value,
        params: String,
    ) -> Result<(String, oneshot::Receiver<QueueResult>), CocoError> {
        let mut fifo = self.fifo.lock().await;
        if self.capacity > 0 && fifo.len() >= self.capacity {
            self.dropped
                .entry(endpoint.clone())
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
            return Err(CocoError::CheckFailure("Coco queue is full.".to_string()));
        }

        let key = self.next_key();
        let received_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(key.clone(), tx);

        fifo.push_back(QueueEntry {
            key: key.clone(),
            method,
            endpoint,
            request_body,
            params,
            received_timestamp,
        });
        drop(fifo);
        self.notify.notify_one();

        Ok((key, rx))
    }

    async fn dequeue(&self) -> Option<QueueEntry> {
        loop {
            {
                let mut fifo = self.fifo.lock().await;
                if let Some(entry) = fifo.pop_front() {
                    if entry.is_shutdown_signal() {
                        return None;
                    }
                    return Some(entry);
                }
            }
            self.notify.notified().await;
        }
    }

    fn complete(&self, key: &str, status: u16, body: Value) {
        match self.pending.remove(key) {
            Some((_, tx)) => {
                if tx.send((status, body)).is_err() {
                    debug!(key, "rendezvous receiver already gone (frontend timed out)");
                }
            }
            None => warn!(key, "completed unknown queue entry"),
        }
    }

    async fn shutdown(&self) {
        let mut fifo = self.fifo.lock().await;
        fifo.push_back(QueueEntry {
            key: SHUTDOWN_KEY.to_string(),
            method: String::new(),
            endpoint: String::new(),
            request_body: Value::Null,
            params: String::new(),
            received_timestamp: 0.0,
        });
        drop(fifo);
        self.notify.notify_one();
    }

    fn dropped_count(&self, endpoint: &str) -> u64 {
        self.dropped
            .get(endpoint)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips_metadata() {
        let queue = InMemoryQueue::new(0);
        let (key, _rx) = queue
            .enqueue("GET".into(), "ping".into(), serde_json::json!({}), String::new())
            .await
            .unwrap();
        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.key, key);
        assert_eq!(entry.endpoint, "ping");
    }

    #[tokio::test]
    async fn full_queue_is_rejected_and_increments_dropped_counter() {
        let queue = InMemoryQueue::new(1);
        queue
            .enqueue("GET".into(), "ping".into(), serde_json::json!({}), String::new())
            .await
            .unwrap();
        let err = queue
            .enqueue("GET".into(), "ping".into(), serde_json::json!({}), String::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CocoError::CheckFailure(_)));
        assert_eq!(queue.dropped_count("ping"), 1);
    }

    #[tokio::test]
    async fn complete_delivers_through_the_rendezvous() {
        let queue = InMemoryQueue::new(0);
        let (key, rx) = queue
            .enqueue("GET".into(), "ping".into(), serde_json::json!({}), String::new())
            .await
            .unwrap();
        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.key, key);
        queue.complete(&key, 200, serde_json::json!({"ok": true}));
        let (status, body) = rx.await.unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn complete_after_receiver_dropped_does_not_panic() {
        let queue = InMemoryQueue::new(0);
        let (key, rx) = queue
            .enqueue("GET".into(), "ping".into(), serde_json::json!({}), String::new())
            .await
            .unwrap();
        drop(rx);
        queue.complete(&key, 200, serde_json::json!({}));
    }

    #[tokio::test]
    async fn shutdown_sentinel_ends_dequeue_with_none() {
        let queue = InMemoryQueue::new(0);
        queue.shutdown().await;
        assert!(queue.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn dequeue_blocks_until_an_entry_is_enqueued() {
        let queue = std::sync::Arc::new(InMemoryQueue::new(0));
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue
            .enqueue("GET".into(), "late".into(), serde_json::json!({}), String::new())
            .await
            .unwrap();
        let entry = consumer.await.unwrap().unwrap();
        assert_eq!(entry.endpoint, "late");
    }
}
