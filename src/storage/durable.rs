//! Durable store with a write-through in-memory cache.
//!
//! The database is the single source of truth. Every write goes to the
//! database first and reaches the cache only after the database accepted it;
//! reads are served from the cache alone. The cache is filled from the
//! database before the store is handed out, so it never lags behind committed
//! rows at startup.

use std::str::FromStr;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::model::{MetricKind, MetricUpdate, Snapshot, WireItem};
use crate::retry::RetryPolicy;
use crate::storage::db::SqlitePool;
use crate::storage::schema::{
    SELECT_ALL_SQL, UPSERT_COUNTER_SQL, UPSERT_GAUGE_SQL, init_schema,
};
use crate::storage::{InMemoryStore, MetricStore, StorageError};

type MetricRow = (String, String, Option<f64>, Option<i64>);

/// SQLite-backed store that serves reads from an [`InMemoryStore`].
///
/// Writers are serialized by a write gate held across "database write, then
/// cache write", so the cache applies gauge writes in commit order. Readers
/// never take the gate.
pub struct DurableCachedStore {
    pool: SqlitePool,
    cache: InMemoryStore,
    write_gate: Mutex<()>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for DurableCachedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableCachedStore")
            .field("pool", &self.pool)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl DurableCachedStore {
    /// Open the store with the default retry policy.
    pub async fn open(pool: SqlitePool) -> Result<Self, StorageError> {
        Self::open_with_retry(pool, RetryPolicy::default()).await
    }

    /// Create the schema, then load every persisted row into the cache.
    pub async fn open_with_retry(
        pool: SqlitePool,
        retry: RetryPolicy,
    ) -> Result<Self, StorageError> {
        init_schema(&pool).await?;

        let store = Self {
            pool,
            cache: InMemoryStore::new(),
            write_gate: Mutex::new(()),
            retry,
            shutdown: CancellationToken::new(),
        };
        let loaded = store.init_cache().await?;
        tracing::info!(loaded, "Metric cache loaded from database");
        Ok(store)
    }

    /// Replay every persisted row into the cache.
    async fn init_cache(&self) -> Result<usize, StorageError> {
        let rows: Vec<MetricRow> = sqlx::query_as(SELECT_ALL_SQL)
            .fetch_all(self.pool.inner())
            .await?;

        for (name, kind, value, delta) in &rows {
            let kind = MetricKind::from_str(kind).map_err(|_| {
                StorageError::InvalidData(format!("metric '{name}' has unknown type '{kind}'"))
            })?;
            let item = WireItem {
                id: name.clone(),
                kind,
                value: *value,
                delta: *delta,
            };
            let update = item
                .validate()
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            match update {
                MetricUpdate::Gauge { name, value } => self.cache.set_gauge(name, value),
                MetricUpdate::Counter { name, delta } => self.cache.add_counter(name, delta),
            }
        }

        Ok(rows.len())
    }

    /// Shared connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Abort pending retries and close the pool.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.pool.close().await;
    }

    async fn write_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        sqlx::query(UPSERT_GAUGE_SQL)
            .bind(name)
            .bind(value)
            .bind(now_millis())
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    async fn write_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        sqlx::query(UPSERT_COUNTER_SQL)
            .bind(name)
            .bind(delta)
            .bind(now_millis())
            .execute(self.pool.inner())
            .await?;
        Ok(())
    }

    /// Apply the whole batch in one transaction.
    ///
    /// Any failing item returns early; the uncommitted transaction is rolled
    /// back when dropped, so nothing from the batch is persisted. The two
    /// upserts are prepared once per connection by the sqlx statement cache.
    async fn write_batch(&self, items: &[WireItem]) -> Result<(), StorageError> {
        let mut tx = self.pool.inner().begin().await?;
        let now = now_millis();

        for item in items {
            match item.validate()? {
                MetricUpdate::Gauge { name, value } => {
                    sqlx::query(UPSERT_GAUGE_SQL)
                        .bind(name)
                        .bind(value)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                }
                MetricUpdate::Counter { name, delta } => {
                    sqlx::query(UPSERT_COUNTER_SQL)
                        .bind(name)
                        .bind(delta)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricStore for DurableCachedStore {
    async fn update_gauge(&self, name: &str, value: f64) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.retry
            .run(&self.shutdown, || self.write_gauge(name, value))
            .await?;
        self.cache.update_gauge(name, value).await
    }

    async fn update_counter(&self, name: &str, delta: i64) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.retry
            .run(&self.shutdown, || self.write_counter(name, delta))
            .await?;
        self.cache.update_counter(name, delta).await
    }

    async fn get_metrics(&self) -> Result<Snapshot, StorageError> {
        self.cache.get_metrics().await
    }

    async fn update_all(&self, items: &[WireItem]) -> Result<(), StorageError> {
        let _gate = self.write_gate.lock().await;
        self.retry
            .run(&self.shutdown, || self.write_batch(items))
            .await
            .inspect_err(|e| tracing::warn!(error = %e, items = items.len(), "Batch rolled back"))?;
        self.cache.update_all(items).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.pool.ping().await
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
