//! Configuration module for runmetrics.
//!
//! Provides YAML-based configuration loading and validation for:
//! - The collector server (listener, storage backend, snapshot settings)
//! - The agent (collector address, poll/report periods, delivery mode, rate limit)
//!
//! Command-line flags and environment variables override file values in the
//! binaries.

mod agent;
mod server;
mod validation;

pub use agent::{
    AgentFileConfig, DEFAULT_POLL_INTERVAL, DEFAULT_RATE_LIMIT, DEFAULT_REPORT_INTERVAL,
    DEFAULT_SERVER_URL, MAX_WORKERS,
};
pub use server::{HttpConfig, ServerFileConfig, SnapshotSettings, StorageConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
