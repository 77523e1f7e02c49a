//! Batch snapshot delivery.
//!
//! On each report tick the full local snapshot is split into batches of at
//! most [`MAX_BATCH_SIZE`](crate::model::MAX_BATCH_SIZE) items and each batch
//! is sent through the shared retry policy.
//!
//! Counters travel as deltas: once a batch is acknowledged, the counter
//! values it carried are subtracted from the local store, so the next report
//! only carries what accumulated since. Increments recorded while a batch is in
//! flight are kept.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::agent::{AgentError, Transport};
use crate::model::{MetricUpdate, WireItem, batches};
use crate::retry::RetryPolicy;
use crate::storage::InMemoryStore;

/// Sends the local snapshot in retried batches.
pub struct BatchReporter {
    store: Arc<InMemoryStore>,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for BatchReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReporter")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl BatchReporter {
    pub fn new(store: Arc<InMemoryStore>, transport: Arc<dyn Transport>) -> Self {
        Self::with_retry(store, transport, RetryPolicy::default())
    }

    pub fn with_retry(
        store: Arc<InMemoryStore>,
        transport: Arc<dyn Transport>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            retry,
        }
    }

    /// Deliver every metric in the local store.
    ///
    /// Returns the number of items delivered. Stops at the first batch that
    /// cannot be delivered; earlier batches stay delivered.
    pub async fn report(&self, cancel: &CancellationToken) -> Result<usize, AgentError> {
        let items = self.store.snapshot().to_wire_items();
        if items.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for batch in batches(&items) {
            self.retry
                .run(cancel, || self.transport.send_batch(batch))
                .await
                .inspect_err(|e| {
                    tracing::error!(
                        delivered,
                        pending = items.len() - delivered,
                        error = %e,
                        "Batch report failed"
                    )
                })?;
            self.drain_counters(batch);
            delivered += batch.len();
        }

        tracing::debug!(items = delivered, "Metrics reported");
        Ok(delivered)
    }

    fn drain_counters(&self, batch: &[WireItem]) {
        for item in batch {
            if let Ok(MetricUpdate::Counter { name, delta }) = item.validate() {
                self.store.add_counter(name, delta.wrapping_neg());
            }
        }
    }
}
