//! Bounded request queue for holding requests during outages
//!
//! Each queued entry carries a oneshot sender; the background queue
//! processor completes it with either a real response or an error. Entries
//! older than the configured TTL are dropped on dequeue and their futures
//! complete with an expiry error. Clearing the queue drops all senders,
//! which cancels the corresponding receivers.

use chrono::{DateTime, Utc};
use coscient_core::{GatewayError, LlmRequest, LlmResponse};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};

/// Receiver half handed back on enqueue; resolves when the queue processor
/// completes the request.
pub type QueuedReceipt = oneshot::Receiver<Result<LlmResponse, GatewayError>>;

/// A request waiting for the upstream model to recover.
pub struct QueuedRequest {
    pub request: LlmRequest,
    pub enqueued_at: DateTime<Utc>,
    enqueued_instant: Instant,
    tx: oneshot::Sender<Result<LlmResponse, GatewayError>>,
}

impl QueuedRequest {
    /// Complete the waiting future. Ignores a receiver that has gone away.
    pub fn complete(self, result: Result<LlmResponse, GatewayError>) {
        let _ = self.tx.send(result);
    }

    fn age(&self) -> Duration {
        self.enqueued_instant.elapsed()
    }
}

/// Bounded FIFO of requests queued while a model's breaker is open.
pub struct RequestQueue {
    max_size: usize,
    max_wait_time: Duration,
    inner: Mutex<VecDeque<QueuedRequest>>,
}

impl RequestQueue {
    pub fn new(max_size: usize, max_wait_time: Duration) -> Self {
        Self {
            max_size,
            max_wait_time,
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn size(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    /// Add a request to the queue. Returns `None` when the queue is full,
    /// otherwise the receipt that will resolve on later processing.
    pub async fn enqueue(&self, request: LlmRequest) -> Option<QueuedReceipt> {
        let mut queue = self.inner.lock().await;
        if queue.len() >= self.max_size {
            return None;
        }

        let (tx, rx) = oneshot::channel();
        queue.push_back(QueuedRequest {
            request,
            enqueued_at: Utc::now(),
            enqueued_instant: Instant::now(),
            tx,
        });
        Some(rx)
    }

    /// Remove and return the oldest non-expired request. Expired entries
    /// are dropped and their futures complete with an expiry error.
    pub async fn dequeue(&self) -> Option<QueuedRequest> {
        let mut queue = self.inner.lock().await;

        while let Some(entry) = queue.pop_front() {
            let age = entry.age();
            if age > self.max_wait_time {
                let waited_secs = age.as_secs();
                entry.complete(Err(GatewayError::RequestExpired { waited_secs }));
                continue;
            }
            return Some(entry);
        }

        None
    }

    /// Put an entry back at the head of the queue (the model is still down).
    pub async fn requeue(&self, entry: QueuedRequest) {
        self.inner.lock().await.push_front(entry);
    }

    /// Drop every queued entry, cancelling all waiting futures.
    pub async fn clear(&self) {
        self.inner.lock().await.clear();
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_size", &self.max_size)
            .field("max_wait_time", &self.max_wait_time)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coscient_core::{AgentType, RequestContent, RequestType};
    use serde_json::Map;

    fn request(id: &str) -> LlmRequest {
        LlmRequest::new(
            id,
            AgentType::Generation,
            RequestType::Generate,
            RequestContent::new("prompt"),
        )
    }

    #[tokio::test]
    async fn enqueue_dequeue_round_trip() {
        let queue = RequestQueue::new(10, Duration::from_secs(300));
        assert!(queue.is_empty().await);

        let _receipt = queue.enqueue(request("a")).await.unwrap();
        assert_eq!(queue.size().await, 1);

        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.request.request_id, "a");
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_refuses_when_full() {
        let queue = RequestQueue::new(2, Duration::from_secs(300));
        assert!(queue.enqueue(request("a")).await.is_some());
        assert!(queue.enqueue(request("b")).await.is_some());
        assert!(queue.enqueue(request("c")).await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_complete_with_error() {
        let queue = RequestQueue::new(10, Duration::from_millis(10));
        let receipt = queue.enqueue(request("stale")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(queue.dequeue().await.is_none());

        let result = receipt.await.unwrap();
        assert!(matches!(result, Err(GatewayError::RequestExpired { .. })));
    }

    #[tokio::test]
    async fn dequeue_skips_expired_and_returns_fresh() {
        let queue = RequestQueue::new(10, Duration::from_millis(50));
        let _stale = queue.enqueue(request("stale")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        let _fresh = queue.enqueue(request("fresh")).await.unwrap();

        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.request.request_id, "fresh");
    }

    #[tokio::test]
    async fn completion_resolves_receipt() {
        let queue = RequestQueue::new(10, Duration::from_secs(300));
        let receipt = queue.enqueue(request("a")).await.unwrap();

        let entry = queue.dequeue().await.unwrap();
        entry.complete(Ok(LlmResponse::success("a", "done", Map::new())));

        let result = receipt.await.unwrap().unwrap();
        assert_eq!(result.content(), Some("done"));
    }

    #[tokio::test]
    async fn clear_cancels_waiters() {
        let queue = RequestQueue::new(10, Duration::from_secs(300));
        let receipt = queue.enqueue(request("a")).await.unwrap();
        queue.clear().await;
        // Sender dropped: the receiver observes cancellation.
        assert!(receipt.await.is_err());
    }

    #[tokio::test]
    async fn requeue_preserves_order_at_head() {
        let queue = RequestQueue::new(10, Duration::from_secs(300));
        let _a = queue.enqueue(request("a")).await.unwrap();
        let _b = queue.enqueue(request("b")).await.unwrap();

        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.request.request_id, "a");
        queue.requeue(entry).await;

        let entry = queue.dequeue().await.unwrap();
        assert_eq!(entry.request.request_id, "a");
    }
}
