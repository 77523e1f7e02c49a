//! Storage builder and manager.
//!
//! [`StorageBuilder`] selects the backend: a database URL gives the durable
//! SQLite store, otherwise the in-memory store with file snapshots. The
//! resulting [`StorageManager`] is owned by the process entry point and hands
//! out `Arc<dyn MetricStore>` to whoever needs the store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use strum_macros::{AsRefStr, Display};

use crate::retry::RetryPolicy;
use crate::storage::db::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
use crate::storage::saver::{PersistenceWorker, SnapshotConfig};
use crate::storage::{DurableCachedStore, InMemoryStore, MetricStore, StorageError};

/// Which engine backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

/// Builder for constructing the storage layer.
#[derive(Debug, Clone)]
pub struct StorageBuilder {
    database_url: Option<String>,
    max_connections: u32,
    snapshot: SnapshotConfig,
    retry: RetryPolicy,
}

impl Default for StorageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBuilder {
    /// Create a builder for the in-memory backend with default snapshot settings.
    pub fn new() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            snapshot: SnapshotConfig::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Use the durable SQLite backend. Empty URLs are ignored.
    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.database_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    /// Set the connection pool size.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the snapshot file location.
    pub fn snapshot_path(mut self, path: impl AsRef<Path>) -> Self {
        self.snapshot.path = path.as_ref().to_path_buf();
        self
    }

    /// Set the period between snapshots. Zero disables periodic saves.
    pub fn snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot.interval = interval;
        self
    }

    /// Load the snapshot file on start.
    pub fn restore(mut self, restore: bool) -> Self {
        self.snapshot.restore = restore;
        self
    }

    /// Retry schedule for durable writes.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Build the storage layer.
    ///
    /// For the durable backend this connects, creates the schema and loads the
    /// cache before returning.
    pub async fn build(self) -> Result<StorageManager, StorageError> {
        let Some(url) = self.database_url else {
            let store = Arc::new(InMemoryStore::new());
            let saver = PersistenceWorker::new(store.clone(), self.snapshot);
            tracing::info!(backend = %BackendKind::Memory, "Storage initialized");
            return Ok(StorageManager {
                store,
                backend: Backend::Memory(saver),
            });
        };

        if let Some(parent) = sqlite_parent_dir(&url) {
            std::fs::create_dir_all(&parent)?;
        }

        let pool = SqlitePool::connect(&url, self.max_connections).await?;
        let durable = Arc::new(DurableCachedStore::open_with_retry(pool, self.retry).await?);
        tracing::info!(
            backend = %BackendKind::Sqlite,
            max_connections = self.max_connections,
            "Storage initialized"
        );

        Ok(StorageManager {
            store: durable.clone(),
            backend: Backend::Sqlite(durable),
        })
    }
}

/// Directory that must exist for a file-backed SQLite URL.
fn sqlite_parent_dir(url: &str) -> Option<PathBuf> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path == ":memory:" {
        return None;
    }
    Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
}

enum Backend {
    Memory(PersistenceWorker),
    Sqlite(Arc<DurableCachedStore>),
}

/// Owns the active store and drives its snapshot lifecycle.
pub struct StorageManager {
    store: Arc<dyn MetricStore>,
    backend: Backend,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

impl StorageManager {
    /// Shared handle to the active store.
    pub fn store(&self) -> Arc<dyn MetricStore> {
        Arc::clone(&self.store)
    }

    pub fn backend(&self) -> BackendKind {
        match self.backend {
            Backend::Memory(_) => BackendKind::Memory,
            Backend::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    /// Restore the snapshot and start periodic saves.
    ///
    /// No-op for the durable backend.
    pub async fn saver_run(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Memory(saver) => saver.run().await,
            Backend::Sqlite(_) => Ok(()),
        }
    }

    /// Stop periodic saves and write the final snapshot.
    ///
    /// No-op for the durable backend.
    pub async fn saver_stop(&self) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Memory(saver) => saver.stop().await,
            Backend::Sqlite(_) => Ok(()),
        }
    }

    /// Release backend resources.
    pub async fn close(&self) {
        if let Backend::Sqlite(durable) = &self.backend {
            durable.close().await;
            tracing::info!("Database pool closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_default_build_is_memory() {
        let dir = tempdir().unwrap();
        let manager = StorageBuilder::new()
            .snapshot_path(dir.path().join("metrics.json"))
            .build()
            .await
            .unwrap();

        assert_eq!(manager.backend(), BackendKind::Memory);
        assert_eq!(manager.backend().to_string(), "memory");
        assert!(manager.store().ping().await.is_err());
    }

    #[tokio::test]
    async fn test_empty_database_url_falls_back_to_memory() {
        let manager = StorageBuilder::new().database_url("  ").build().await.unwrap();
        assert_eq!(manager.backend(), BackendKind::Memory);
    }

    #[tokio::test]
    async fn test_memory_lifecycle_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let build = || {
            StorageBuilder::new()
                .snapshot_path(&path)
                .snapshot_interval(Duration::from_secs(60))
                .restore(true)
                .build()
        };

        let manager = build().await.unwrap();
        manager.saver_run().await.unwrap();
        let store = manager.store();
        store.update_gauge("temp", 23.5).await.unwrap();
        store.update_counter("reqs", 10).await.unwrap();
        manager.saver_stop().await.unwrap();
        manager.close().await;

        let manager = build().await.unwrap();
        manager.saver_run().await.unwrap();
        let snapshot = manager.store().get_metrics().await.unwrap();
        assert_eq!(snapshot.gauges["temp"], 23.5);
        assert_eq!(snapshot.counters["reqs"], 10);
        manager.saver_stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_backend_skips_snapshots() {
        let dir = tempdir().unwrap();
        let snapshot_path = dir.path().join("metrics.json");
        let url = format!("sqlite:{}", dir.path().join("data").join("metrics.db").display());

        let manager = StorageBuilder::new()
            .database_url(&url)
            .snapshot_path(&snapshot_path)
            .retry_policy(RetryPolicy::no_retry())
            .build()
            .await
            .unwrap();
        assert_eq!(manager.backend(), BackendKind::Sqlite);

        manager.saver_run().await.unwrap();
        manager.store().update_counter("reqs", 2).await.unwrap();
        manager.store().ping().await.unwrap();
        manager.saver_stop().await.unwrap();
        assert!(!snapshot_path.exists());
        manager.close().await;

        let manager = StorageBuilder::new()
            .database_url(&url)
            .build()
            .await
            .unwrap();
        assert_eq!(manager.store().get_metrics().await.unwrap().counters["reqs"], 2);
        manager.close().await;
    }

    #[test]
    fn test_sqlite_parent_dir() {
        assert_eq!(sqlite_parent_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_parent_dir("postgres://db/metrics"), None);
        assert_eq!(sqlite_parent_dir("sqlite:metrics.db"), None);
        assert_eq!(
            sqlite_parent_dir("sqlite:///nonexistent-dir-for-test/metrics.db?mode=rwc"),
            Some(PathBuf::from("/nonexistent-dir-for-test"))
        );
    }
}
