//! Database backends for the durable store.
//!
//! - `SqlitePool`: connection pool wrapper for SQLite
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/metrics.db", 5).await?;
//! pool.ping().await?;
//! ```

mod sqlite;

pub use sqlite::{DEFAULT_MAX_CONNECTIONS, SqlitePool};
