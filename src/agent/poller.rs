//! Poll ticks and the delivery queue.
//!
//! Every tick runs each sampler in its own task. A task applies its samples to
//! the agent's local store, then publishes them to the delivery queue for the
//! streamed senders.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinSet;

use crate::agent::Sampler;
use crate::model::{MetricKind, WireItem};
use crate::storage::InMemoryStore;

/// Default delivery queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Producer side of the bounded delivery queue.
///
/// Publishing never blocks: items are dropped and counted when the queue is
/// full.
#[derive(Clone)]
pub struct DeliveryQueue {
    tx: Sender<WireItem>,
    include_counters: bool,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("include_counters", &self.include_counters)
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` items.
    ///
    /// With `include_counters` off only gauges are queued; counters then
    /// reach the collector through the batch path alone.
    pub fn bounded(capacity: usize, include_counters: bool) -> (Self, Receiver<WireItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let queue = Self {
            tx,
            include_counters,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (queue, rx)
    }

    /// Enqueue an item. Returns `false` if it was filtered out or dropped.
    pub fn publish(&self, item: WireItem) -> bool {
        if item.kind == MetricKind::Counter && !self.include_counters {
            return false;
        }
        if self.tx.try_send(item).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Items dropped because the queue was full or closed.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Runs the samplers on each poll tick.
pub struct Poller {
    samplers: Vec<Arc<dyn Sampler>>,
    store: Arc<InMemoryStore>,
    queue: Option<DeliveryQueue>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.samplers.iter().map(|s| s.name()).collect();
        f.debug_struct("Poller")
            .field("samplers", &names)
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Poller {
    pub fn new(
        samplers: Vec<Arc<dyn Sampler>>,
        store: Arc<InMemoryStore>,
        queue: Option<DeliveryQueue>,
    ) -> Self {
        Self {
            samplers,
            store,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    pub fn queue(&self) -> Option<&DeliveryQueue> {
        self.queue.as_ref()
    }

    /// Spawn one task per sampler into `tasks`.
    pub fn tick(&self, tasks: &mut JoinSet<()>) {
        for sampler in &self.samplers {
            let sampler = Arc::clone(sampler);
            let store = Arc::clone(&self.store);
            let queue = self.queue.clone();
            tasks.spawn(run_sampler(sampler, store, queue));
        }
    }

    /// Run one full tick and wait for every sampler to finish.
    pub async fn poll_once(&self) {
        let mut tasks = JoinSet::new();
        self.tick(&mut tasks);
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Sampler task panicked");
            }
        }
    }
}

async fn run_sampler(
    sampler: Arc<dyn Sampler>,
    store: Arc<InMemoryStore>,
    queue: Option<DeliveryQueue>,
) {
    let items = match sampler.sample().await {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!(sampler = sampler.name(), error = %e, "Sampling failed");
            return;
        }
    };

    if let Err(e) = store.apply_all(&items) {
        tracing::warn!(sampler = sampler.name(), error = %e, "Sampler produced invalid metrics");
    }

    let Some(queue) = queue else {
        return;
    };
    let total = items.len();
    let queued = items
        .into_iter()
        .map(|item| queue.publish(item))
        .filter(|queued| *queued)
        .count();
    tracing::trace!(sampler = sampler.name(), total, queued, "Samples published");
}
