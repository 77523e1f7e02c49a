//! In-memory metrics store.
//!
//! Both collections sit behind one exclusive lock: every read and write
//! serializes against every other, whichever name it touches. Per-name
//! sharding would reduce contention without changing the [`MetricStore`]
//! contract.

use parking_lot::Mutex;

use crate::model::{Counters, Gauges, MetricUpdate, Snapshot, WireItem};
use crate::storage::{MetricStore, StorageError};

#[derive(Debug, Default)]
struct Maps {
    gauges: Gauges,
    counters: Counters,
}

impl Maps {
    fn apply(&mut self, update: MetricUpdate<'_>) {
        match update {
            MetricUpdate::Gauge { name, value } => {
                self.gauges.insert(name.to_owned(), value);
            }
            MetricUpdate::Counter { name, delta } => {
                let total = self.counters.entry(name.to_owned()).or_insert(0);
                *total = total.wrapping_add(delta);
            }
        }
    }
}

/// Lock-protected gauge and counter maps.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    maps: Mutex<Maps>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a gauge without going through the async trait.
    pub fn set_gauge(&self, name: &str, value: f64) {
        self.maps.lock().apply(MetricUpdate::Gauge { name, value });
    }

    /// Add to a counter without going through the async trait.
    pub fn add_counter(&self, name: &str, delta: i64) {
        self.maps.lock().apply(MetricUpdate::Counter { name, delta });
    }

    /// Deep copy of both collections.
    pub fn snapshot(&self) -> Snapshot {
        let maps = self.maps.lock();
        Snapshot {
            gauges: maps.gauges.clone(),
            counters: maps.counters.clone(),
        }
    }

    /// Apply items in order under one lock acquisition.
    ///
    /// Malformed items are skipped; every failure is reported in the returned
    /// error after the remaining items have been applied.
    pub fn apply_all(&self, items: &[WireItem]) -> Result<(), StorageError> {
        let mut errors = Vec::new();
        {
            let mut maps = self.maps.lock();
            for item in items {
                match item.validate() {
                    Ok(update) => maps.apply(update),
                    Err(e) => errors.push(e),
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            tracing::warn!(failed = errors.len(), total = items.len(), "Skipped malformed metrics");
            Err(StorageError::InvalidBatch(errors))
        }
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryStore {
    async fn update_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        self.set_gauge(name, value);
        Ok(())
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        self.add_counter(name, delta);
        Ok(())
    }

    async fn get_metrics(&self) -> Result<Snapshot, StorageError> {
        Ok(self.snapshot())
    }

    async fn update_all(&self, items: &[WireItem]) -> Result<(), StorageError> {
        self.apply_all(items)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Err(StorageError::Unavailable(
            "in-memory storage has no database connection".to_string(),
        ))
    }
}
