//! Streamed per-item delivery.
//!
//! A fixed pool of workers drains the delivery queue. Every send waits for a
//! token from the shared [`RateLimiter`] and is attempted once; failures are
//! logged and the worker moves on to the next item.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::agent::{RateLimiter, Transport};
use crate::model::WireItem;

/// Delivery counters shared by all workers.
#[derive(Debug, Default)]
pub struct SenderStats {
    sent: AtomicU64,
    failed: AtomicU64,
}

impl SenderStats {
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Worker pool for streamed delivery.
pub struct RateLimitedSender {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    workers: usize,
    stats: Arc<SenderStats>,
}

impl std::fmt::Debug for RateLimitedSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedSender")
            .field("workers", &self.workers)
            .field("limiter", &self.limiter)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl RateLimitedSender {
    pub fn new(transport: Arc<dyn Transport>, limiter: Arc<RateLimiter>, workers: usize) -> Self {
        Self {
            transport,
            limiter,
            workers: workers.max(1),
            stats: Arc::new(SenderStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        Arc::clone(&self.stats)
    }

    /// Start the workers. They stop when `cancel` fires or the queue closes.
    pub fn spawn(&self, rx: Receiver<WireItem>, cancel: CancellationToken) -> JoinSet<()> {
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = JoinSet::new();

        for id in 0..self.workers {
            workers.spawn(worker_loop(
                id,
                Arc::clone(&rx),
                Arc::clone(&self.transport),
                Arc::clone(&self.limiter),
                Arc::clone(&self.stats),
                cancel.clone(),
            ));
        }

        tracing::debug!(workers = self.workers, "Sender workers started");
        workers
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<Receiver<WireItem>>>,
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    stats: Arc<SenderStats>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = async { rx.lock().await.recv().await } => item,
        };
        let Some(item) = next else {
            break;
        };

        if limiter.acquire(&cancel).await.is_err() {
            break;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = transport.send_item(&item) => result,
        };
        match result {
            Ok(()) => {
                stats.sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(worker = id, metric = %item.id, error = %e, "Metric delivery failed");
            }
        }
    }

    tracing::debug!(worker = id, "Sender worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{DeliveryQueue, RateLimitConfig, TransportError};
    use std::time::Duration;
    use tokio::time::Instant;

    #[derive(Default)]
    struct RecordingTransport {
        items: parking_lot::Mutex<Vec<WireItem>>,
        fail_ids: Vec<String>,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn send_item(&self, item: &WireItem) -> Result<(), TransportError> {
            if self.fail_ids.contains(&item.id) {
                return Err(TransportError::Status(500));
            }
            self.items.lock().push(item.clone());
            Ok(())
        }

        async fn send_batch(&self, _items: &[WireItem]) -> Result<(), TransportError> {
            unreachable!("streamed sender never sends batches")
        }
    }

    #[tokio::test]
    async fn test_failed_item_does_not_stop_worker() {
        let transport = Arc::new(RecordingTransport {
            fail_ids: vec!["bad".to_string()],
            ..Default::default()
        });
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_second(0.0)));
        let sender = RateLimitedSender::new(transport.clone(), limiter, 1);
        let (queue, rx) = DeliveryQueue::bounded(8, true);

        queue.publish(WireItem::gauge("a", 1.0));
        queue.publish(WireItem::gauge("bad", 2.0));
        queue.publish(WireItem::gauge("b", 3.0));
        drop(queue);

        let mut workers = sender.spawn(rx, CancellationToken::new());
        while workers.join_next().await.is_some() {}

        let ids: Vec<_> = transport.items.lock().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(sender.stats().sent(), 2);
        assert_eq!(sender.stats().failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_workers_share_one_rate_limit() {
        let transport = Arc::new(RecordingTransport::default());
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_second(10.0)));
        let sender = RateLimitedSender::new(transport.clone(), limiter, 4);
        let (queue, rx) = DeliveryQueue::bounded(16, true);

        for i in 0..6 {
            queue.publish(WireItem::counter(format!("c{i}"), 1));
        }
        drop(queue);

        let start = Instant::now();
        let mut workers = sender.spawn(rx, CancellationToken::new());
        while workers.join_next().await.is_some() {}

        assert_eq!(transport.items.lock().len(), 6);
        assert!(start.elapsed() >= Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_idle_workers() {
        let transport = Arc::new(RecordingTransport::default());
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_second(1.0)));
        let sender = RateLimitedSender::new(transport, limiter, 3);
        let (_queue, rx) = DeliveryQueue::bounded(4, true);
        let cancel = CancellationToken::new();

        let mut workers = sender.spawn(rx, cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let mut stopped = 0;
        while workers.join_next().await.is_some() {
            stopped += 1;
        }
        assert_eq!(stopped, 3);
    }
}
