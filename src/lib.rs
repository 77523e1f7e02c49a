//! runmetrics - runtime telemetry agent and collector
//!
//! The agent samples process, runtime and host statistics and pushes them to
//! the collector, either one at a time under a rate limit or as periodic
//! batches. The collector keeps metrics in memory, backed either by a JSON
//! snapshot file or by SQLite with a write-through cache.
//!
//! # Architecture
//!
//! - **Model**: gauges, counters and their JSON wire form
//! - **Retry**: fixed-schedule retry for transient failures, shared by both sides
//! - **Storage**: in-memory and durable cached stores behind one trait
//! - **Agent**: samplers, delivery queue, rate-limited sender, batch reporter
//! - **Server**: axum HTTP endpoints over the store
//!
//! # Example
//!
//! ```rust,no_run
//! use runmetrics::storage::{MetricStore, StorageBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = StorageBuilder::new()
//!     .snapshot_path("data/metrics.json")
//!     .build()
//!     .await?;
//! manager.saver_run().await?;
//!
//! manager.store().update_gauge("Alloc", 1024.0).await?;
//!
//! manager.saver_stop().await?;
//! manager.close().await;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod config;
pub mod model;
pub mod retry;
pub mod server;
pub mod storage;

pub use agent::{Agent, AgentOptions, DeliveryMode};
pub use config::{AgentFileConfig, ConfigError, ServerFileConfig};
pub use model::{MetricKind, Snapshot, WireItem};
pub use retry::RetryPolicy;
pub use storage::{MetricStore, StorageBuilder, StorageError, StorageManager};
