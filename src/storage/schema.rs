//! Database schema definitions.

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// SQL statement for creating the metrics table.
///
/// One row per (type, name): gauges fill `value`, counters fill `delta`.
/// Timestamps are Unix millis.
pub const METRICS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    name       TEXT    NOT NULL,
    type       TEXT    NOT NULL CHECK (type IN ('gauge', 'counter')),
    value      REAL,
    delta      INTEGER,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (type, name)
);
"#;

/// Gauge upsert: last write wins.
pub const UPSERT_GAUGE_SQL: &str = r#"
INSERT INTO metrics (name, type, value, updated_at)
VALUES (?1, 'gauge', ?2, ?3)
ON CONFLICT (type, name) DO UPDATE SET
    value = excluded.value,
    updated_at = excluded.updated_at
"#;

/// Counter upsert: the backend adds the delta in place.
pub const UPSERT_COUNTER_SQL: &str = r#"
INSERT INTO metrics (name, type, delta, updated_at)
VALUES (?1, 'counter', ?2, ?3)
ON CONFLICT (type, name) DO UPDATE SET
    delta = COALESCE(metrics.delta, 0) + excluded.delta,
    updated_at = excluded.updated_at
"#;

/// Every persisted row.
pub const SELECT_ALL_SQL: &str = "SELECT name, type, value, delta FROM metrics";

/// Initialize the database schema.
///
/// Creates the metrics table if it doesn't exist.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(METRICS_TABLE_DDL).execute(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}
