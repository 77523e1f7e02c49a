//! Storage Layer
//!
//! Two engines implement the [`MetricStore`] contract:
//! - **InMemoryStore**: lock-protected gauge and counter maps, optionally
//!   snapshotted to a JSON file by a [`PersistenceWorker`]
//! - **DurableCachedStore**: SQLite as the source of truth with an in-memory
//!   write-through cache serving every read
//!
//! # Components
//!
//! - [`MetricStore`]: the five-operation storage contract
//! - [`StorageBuilder`] / [`StorageManager`]: backend selection and lifecycle
//! - [`PersistenceWorker`]: snapshot restore, periodic save, final save

pub mod db;
mod builder;
mod durable;
mod engine;
mod error;
mod memory;
mod saver;
mod schema;

pub use builder::{BackendKind, StorageBuilder, StorageManager};
pub use durable::DurableCachedStore;
pub use engine::MetricStore;
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use saver::{
    DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_PATH, PersistenceWorker, SnapshotConfig,
};
