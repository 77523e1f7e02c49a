//! The storage engine contract shared by every backend.

use crate::model::{MetricKind, MetricUpdate, Snapshot, WireItem};
use crate::storage::StorageError;

/// A metrics store.
///
/// Dropping a returned future abandons the operation; durable transactions
/// that were not committed are rolled back by the driver.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync + 'static {
    /// Set a gauge, replacing any previous value.
    async fn update_gauge(&self, name: &str, value: f64) -> Result<(), StorageError>;

    /// Add `delta` to a counter, creating it at zero if absent.
    async fn update_counter(&self, name: &str, delta: i64) -> Result<(), StorageError>;

    /// Owned copy of every gauge and counter.
    async fn get_metrics(&self) -> Result<Snapshot, StorageError>;

    /// Apply a batch of wire items in order.
    async fn update_all(&self, items: &[WireItem]) -> Result<(), StorageError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Look up one metric by kind and name.
    async fn get_metric(&self, kind: MetricKind, name: &str) -> Result<WireItem, StorageError> {
        self.get_metrics()
            .await?
            .get(kind, name)
            .ok_or_else(|| StorageError::NotFound {
                kind,
                name: name.to_string(),
            })
    }

    /// Apply one validated wire item.
    async fn apply(&self, item: &WireItem) -> Result<(), StorageError> {
        match item.validate()? {
            MetricUpdate::Gauge { name, value } => {
                self.update_gauge(name, value).await
            }
            MetricUpdate::Counter { name, delta } => {
                self.update_counter(name, delta).await
            }
        }
    }
}
