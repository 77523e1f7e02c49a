//! Agent main loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tokio::sync::mpsc::Receiver;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::agent::{
    BatchReporter, DEFAULT_QUEUE_CAPACITY, DeliveryQueue, Poller, RateLimitConfig,
    RateLimitedSender, RateLimiter, Sampler, Transport,
};
use crate::model::WireItem;
use crate::retry::RetryPolicy;
use crate::storage::InMemoryStore;

/// Shortest accepted poll or report period.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// How sampled metrics reach the collector.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DeliveryMode {
    /// Every sample is sent on its own by the rate-limited workers.
    Streamed,
    /// The full local snapshot is sent in batches on every report tick.
    Batch,
    /// Gauges are streamed; counters go through the batch path only.
    #[default]
    Both,
}

impl DeliveryMode {
    pub fn streams(self) -> bool {
        matches!(self, Self::Streamed | Self::Both)
    }

    pub fn batches(self) -> bool {
        matches!(self, Self::Batch | Self::Both)
    }

    /// Whether counters go on the delivery queue.
    ///
    /// Never true when the batch path also delivers them, so a counter
    /// increment reaches the collector once.
    pub fn queues_counters(self) -> bool {
        self == Self::Streamed
    }
}

/// Runtime settings for an [`Agent`].
#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub delivery: DeliveryMode,
    /// Streamed sends per second across all workers. Zero disables limiting.
    pub rate_limit: f64,
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            report_interval: Duration::from_secs(10),
            delivery: DeliveryMode::default(),
            rate_limit: 10.0,
            workers: 10,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Sampling and delivery pipeline.
pub struct Agent {
    options: AgentOptions,
    poller: Poller,
    reporter: Option<Arc<BatchReporter>>,
    sender: Option<(RateLimitedSender, Receiver<WireItem>)>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("options", &self.options)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(
        options: AgentOptions,
        samplers: Vec<Arc<dyn Sampler>>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let mode = options.delivery;

        let (queue, sender) = if mode.streams() {
            let (queue, rx) =
                DeliveryQueue::bounded(options.queue_capacity, mode.queues_counters());
            let limiter = Arc::new(RateLimiter::new(RateLimitConfig::per_second(
                options.rate_limit,
            )));
            let sender = RateLimitedSender::new(Arc::clone(&transport), limiter, options.workers);
            (Some(queue), Some((sender, rx)))
        } else {
            (None, None)
        };

        let reporter = mode.batches().then(|| {
            Arc::new(BatchReporter::with_retry(
                Arc::clone(&store),
                transport,
                options.retry.clone(),
            ))
        });

        Self {
            poller: Poller::new(samplers, store, queue),
            options,
            reporter,
            sender,
        }
    }

    /// The agent's local metric store.
    pub fn store(&self) -> Arc<InMemoryStore> {
        Arc::clone(self.poller.store())
    }

    /// Drive poll and report ticks until `cancel` fires.
    ///
    /// At most one batch report runs at a time; a report tick that arrives
    /// while one is still in flight is skipped. Delivery failures are logged.
    /// On return every sampler task, the in-flight report and the sender
    /// workers have finished.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            options,
            poller,
            reporter,
            sender,
        } = self;

        let mut workers = match sender {
            Some((sender, rx)) => sender.spawn(rx, cancel.clone()),
            None => JoinSet::new(),
        };

        let start = Instant::now();
        let mut poll = ticker(start, options.poll_interval);
        let mut report = ticker(start, options.report_interval);

        let mut sampling = JoinSet::new();
        let mut in_flight: Option<JoinHandle<()>> = None;

        tracing::info!(
            delivery = %options.delivery,
            poll_interval = ?options.poll_interval,
            report_interval = ?options.report_interval,
            "Agent started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = poll.tick() => {
                    poller.tick(&mut sampling);
                    while let Some(result) = sampling.try_join_next() {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Sampler task panicked");
                        }
                    }
                }
                _ = report.tick(), if reporter.is_some() => {
                    if in_flight.as_ref().is_some_and(|task| !task.is_finished()) {
                        tracing::debug!("Previous report still running, skipping tick");
                    } else if let Some(reporter) = &reporter {
                        in_flight = Some(tokio::spawn(report_once(
                            Arc::clone(reporter),
                            cancel.clone(),
                        )));
                    }
                }
            }
        }

        tracing::info!("Agent stopping");
        while let Some(result) = sampling.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Sampler task panicked");
            }
        }
        if let Some(task) = in_flight
            && let Err(e) = task.await
        {
            tracing::error!(error = %e, "Report task panicked");
        }
        while workers.join_next().await.is_some() {}
        let dropped = poller.queue().map_or(0, DeliveryQueue::dropped);
        tracing::info!(dropped, "Agent stopped");
    }
}

/// Interval whose first tick is one period from `start`.
fn ticker(start: Instant, period: Duration) -> tokio::time::Interval {
    let period = if period < MIN_INTERVAL {
        tracing::warn!(min_interval = ?MIN_INTERVAL, "Interval below minimum, using minimum");
        MIN_INTERVAL
    } else {
        period
    };
    let mut interval = tokio::time::interval_at(start + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn report_once(reporter: Arc<BatchReporter>, cancel: CancellationToken) {
    match reporter.report(&cancel).await {
        Ok(items) => tracing::debug!(items, "Report delivered"),
        Err(e) if e.is_cancelled() => tracing::debug!("Report cancelled"),
        Err(e) => tracing::warn!(error = %e, "Report failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentError, TransportError};
    use crate::model::MetricKind;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSampler {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Sampler for CountingSampler {
        fn name(&self) -> &str {
            "counting"
        }

        async fn sample(&self) -> Result<Vec<WireItem>, AgentError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(vec![
                WireItem::gauge("Tick", n as f64),
                WireItem::counter("PollCount", 1),
            ])
        }
    }

    #[derive(Default)]
    struct RecordingTransport {
        items: parking_lot::Mutex<Vec<WireItem>>,
        batches: parking_lot::Mutex<Vec<Vec<WireItem>>>,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn send_item(&self, item: &WireItem) -> Result<(), TransportError> {
            self.items.lock().push(item.clone());
            Ok(())
        }

        async fn send_batch(&self, items: &[WireItem]) -> Result<(), TransportError> {
            self.batches.lock().push(items.to_vec());
            Ok(())
        }
    }

    fn options(delivery: DeliveryMode) -> AgentOptions {
        AgentOptions {
            poll_interval: Duration::from_millis(100),
            report_interval: Duration::from_millis(250),
            delivery,
            rate_limit: 0.0,
            workers: 2,
            queue_capacity: 64,
            retry: RetryPolicy::no_retry(),
        }
    }

    async fn run_for(agent: Agent, period: Duration) {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(agent.run(cancel.clone()));
        tokio::time::sleep(period).await;
        cancel.cancel();
        task.await.unwrap();
    }

    #[test]
    fn test_delivery_mode_parsing() {
        assert_eq!(DeliveryMode::from_str("both").unwrap(), DeliveryMode::Both);
        assert_eq!(DeliveryMode::from_str("Streamed").unwrap(), DeliveryMode::Streamed);
        assert_eq!(DeliveryMode::Batch.to_string(), "batch");
        assert!(DeliveryMode::Both.streams() && DeliveryMode::Both.batches());
        assert!(!DeliveryMode::Both.queues_counters());
        assert!(DeliveryMode::Streamed.queues_counters());
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_mode_delivers_each_counter_increment_once() {
        let sampler = Arc::new(CountingSampler {
            calls: AtomicUsize::new(0),
        });
        let transport = Arc::new(RecordingTransport::default());
        let agent = Agent::new(
            options(DeliveryMode::Both),
            vec![sampler.clone() as Arc<dyn Sampler>],
            transport.clone(),
        );
        let store = agent.store();

        run_for(agent, Duration::from_millis(1050)).await;

        let polls = sampler.calls.load(Ordering::SeqCst) as i64;
        assert!(polls >= 10, "polls = {polls}");

        let streamed = transport.items.lock();
        assert!(!streamed.is_empty());
        assert!(streamed.iter().all(|item| item.kind == MetricKind::Gauge));

        let batched: i64 = transport
            .batches
            .lock()
            .iter()
            .flatten()
            .filter_map(|item| item.delta)
            .sum();
        let pending = store.snapshot().counters["PollCount"];
        assert!(batched > 0);
        assert_eq!(batched + pending, polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_mode_never_streams() {
        let sampler: Arc<dyn Sampler> = Arc::new(CountingSampler {
            calls: AtomicUsize::new(0),
        });
        let transport = Arc::new(RecordingTransport::default());
        let agent = Agent::new(options(DeliveryMode::Batch), vec![sampler], transport.clone());

        run_for(agent, Duration::from_millis(600)).await;

        assert!(transport.items.lock().is_empty());
        assert_eq!(transport.batches.lock().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_mode_queues_counters() {
        let sampler: Arc<dyn Sampler> = Arc::new(CountingSampler {
            calls: AtomicUsize::new(0),
        });
        let transport = Arc::new(RecordingTransport::default());
        let agent = Agent::new(options(DeliveryMode::Streamed), vec![sampler], transport.clone());

        run_for(agent, Duration::from_millis(350)).await;

        assert!(transport.batches.lock().is_empty());
        let counters = transport
            .items
            .lock()
            .iter()
            .filter(|item| item.kind == MetricKind::Counter)
            .count();
        assert_eq!(counters, 3);
    }
}
