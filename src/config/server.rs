//! Collector server configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::db::DEFAULT_MAX_CONNECTIONS;
use crate::storage::{DEFAULT_SNAPSHOT_INTERVAL, DEFAULT_SNAPSHOT_PATH, StorageBuilder};

use super::validation::{ConfigError, expand_env_vars, invalid};

// =============================================================================
// HTTP Listener
// =============================================================================

/// HTTP listener configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address (default: "0.0.0.0").
    pub bind: String,

    /// Port (default: 8080).
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Snapshot settings for the in-memory backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotSettings {
    /// Snapshot file (default: "metrics.json").
    pub path: PathBuf,

    /// Save period; zero saves only on shutdown (default: 300s).
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Load the snapshot on start (default: true).
    pub restore: bool,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            restore: true,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite URL. When unset the in-memory backend is used.
    /// `${VAR}` and `${VAR:-default}` are expanded.
    pub database_url: Option<String>,

    /// Connection pool size (default: 5).
    pub max_connections: u32,

    pub snapshot: SnapshotSettings,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            snapshot: SnapshotSettings::default(),
        }
    }
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Top-level server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerFileConfig {
    pub server: HttpConfig,
    pub storage: StorageConfig,
}

impl ServerFileConfig {
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
        self.socket_addr()?;

        if self.server.port == 0 {
            return Err(invalid("server port must be non-zero"));
        }

        if self.storage.max_connections == 0 {
            return Err(invalid("storage max_connections must be positive"));
        }

        if self.storage.snapshot.path.as_os_str().is_empty() {
            return Err(invalid("storage snapshot path must not be empty"));
        }

        Ok(())
    }

    /// Address the HTTP server listens on.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self.server.bind.parse::<IpAddr>().map_err(|_| {
            invalid(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Set `bind` and `port` from a `host:port` address such as `localhost:8080`.
    pub fn set_address(&mut self, address: &str) -> Result<(), ConfigError> {
        let (host, port) = address
            .trim()
            .rsplit_once(':')
            .ok_or_else(|| invalid(format!("address '{address}' must be host:port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| invalid(format!("invalid port in address '{address}'")))?;

        self.server.bind = match host {
            "" => "0.0.0.0".to_string(),
            "localhost" => "127.0.0.1".to_string(),
            other => other.trim_start_matches('[').trim_end_matches(']').to_string(),
        };
        self.server.port = port;
        Ok(())
    }

    /// Database URL after environment expansion; `None` if unset or empty.
    pub fn database_url(&self) -> Option<String> {
        self.storage
            .database_url
            .as_deref()
            .map(expand_env_vars)
            .filter(|url| !url.trim().is_empty())
    }

    /// Storage builder for these settings.
    pub fn storage_builder(&self) -> StorageBuilder {
        let snapshot = &self.storage.snapshot;
        let mut builder = StorageBuilder::new()
            .max_connections(self.storage.max_connections)
            .snapshot_path(&snapshot.path)
            .snapshot_interval(snapshot.interval)
            .restore(snapshot.restore);
        if let Some(url) = self.database_url() {
            builder = builder.database_url(url);
        }
        builder
    }
}
