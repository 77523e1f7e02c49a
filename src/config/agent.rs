//! Agent configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{
    AgentOptions, DEFAULT_QUEUE_CAPACITY, DEFAULT_REQUEST_TIMEOUT, DeliveryMode,
    normalize_server_url,
};
use crate::retry::RetryPolicy;

use super::validation::{ConfigError, invalid};

/// Default collector address.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

/// Default poll period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default report period.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Default streamed send rate.
pub const DEFAULT_RATE_LIMIT: f64 = 10.0;

/// Upper bound on sender workers, derived or explicit.
pub const MAX_WORKERS: usize = 256;

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentFileConfig {
    /// Collector address; `http://` is prefixed when no scheme is given.
    pub server_url: String,

    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    #[serde(with = "humantime_serde")]
    pub report_interval: Duration,

    /// Streamed sends per second; zero disables limiting.
    pub rate_limit: f64,

    /// Sender workers; defaults to the rate limit rounded up, at most
    /// [`MAX_WORKERS`].
    pub workers: Option<usize>,

    pub queue_capacity: usize,

    pub delivery: DeliveryMode,

    /// Gzip request bodies.
    pub compress: bool,

    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for AgentFileConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            report_interval: DEFAULT_REPORT_INTERVAL,
            rate_limit: DEFAULT_RATE_LIMIT,
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            delivery: DeliveryMode::default(),
            compress: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl AgentFileConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let has_host = reqwest::Url::parse(&self.server_url())
            .ok()
            .is_some_and(|url| url.host_str().is_some_and(|host| !host.is_empty()));
        if !has_host {
            return Err(invalid(format!("invalid server url: '{}'", self.server_url)));
        }

        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval must be positive"));
        }

        if self.report_interval.is_zero() {
            return Err(invalid("report_interval must be positive"));
        }

        if !self.rate_limit.is_finite() || self.rate_limit < 0.0 {
            return Err(invalid("rate_limit must be a finite, non-negative number"));
        }

        if let Some(workers) = self.workers
            && !(1..=MAX_WORKERS).contains(&workers)
        {
            return Err(invalid(format!("workers must be between 1 and {MAX_WORKERS}")));
        }

        if self.queue_capacity == 0 {
            return Err(invalid("queue_capacity must be positive"));
        }

        Ok(())
    }

    /// Normalized collector base URL.
    pub fn server_url(&self) -> String {
        normalize_server_url(&self.server_url)
    }

    /// Sender workers, derived from the rate limit when unset.
    pub fn workers(&self) -> usize {
        self.workers
            .unwrap_or_else(|| self.rate_limit.ceil() as usize)
            .clamp(1, MAX_WORKERS)
    }

    /// Runtime options for [`Agent`](crate::agent::Agent).
    pub fn to_options(&self) -> AgentOptions {
        AgentOptions {
            poll_interval: self.poll_interval,
            report_interval: self.report_interval,
            delivery: self.delivery,
            rate_limit: self.rate_limit,
            workers: self.workers(),
            queue_capacity: self.queue_capacity,
            retry: RetryPolicy::default(),
        }
    }
}
