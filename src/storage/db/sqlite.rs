//! SQLite connection pool for the durable metric store.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool as SqlxPool, SqlitePoolOptions,
    SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::storage::StorageError;

/// Pool size used when none is configured.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long an acquire may wait for a free connection.
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a connection waits on a locked database before `SQLITE_BUSY`.
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared pool of SQLite connections.
///
/// The pool is shared by every writer; nothing above this layer assumes a
/// single connection.
#[derive(Clone)]
pub struct SqlitePool {
    inner: SqlxPool,
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("size", &self.inner.size())
            .finish_non_exhaustive()
    }
}

impl SqlitePool {
    /// Open (and create if needed) the database at `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL, e.g., `sqlite:data/metrics.db`
    /// * `max_connections` - pool size, clamped to at least 1
    ///
    /// Connections run in WAL mode with `synchronous = NORMAL`.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        Self::connect_with_busy_timeout(url, max_connections, DEFAULT_BUSY_TIMEOUT).await
    }

    /// Like [`connect`](Self::connect), waiting at most `busy_timeout` on a
    /// locked database before a statement fails with `SQLITE_BUSY`.
    pub async fn connect_with_busy_timeout(
        url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(DEFAULT_ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        tracing::debug!(url, max_connections, "SQLite pool connected");
        Ok(Self { inner: pool })
    }

    /// Raw sqlx pool, for queries and transactions.
    pub fn inner(&self) -> &SqlxPool {
        &self.inner
    }

    /// Round-trip a trivial query to check connectivity.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.inner).await?;
        Ok(())
    }

    /// Wait for checked-out connections and close them all.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_pool_ping_and_close() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("pool.db").display());
        let pool = SqlitePool::connect(&url, 2).await.unwrap();
        assert!(!pool.is_closed());
        pool.ping().await.unwrap();

        pool.close().await;
        assert!(pool.is_closed());
        assert!(pool.ping().await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("wal.db").display());
        let pool = SqlitePool::connect(&url, 1).await.unwrap();

        let row: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(pool.inner())
            .await
            .unwrap();
        assert_eq!(row.0, "wal");

        pool.close().await;
    }
}
