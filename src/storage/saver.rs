//! Snapshot file persistence for the in-memory backend.
//!
//! The file is a JSON array of [`WireItem`]s and is fully rewritten on every
//! save. Writes go to `<path>.tmp` first and are renamed over the target, so a
//! crash mid-save leaves the previous snapshot intact.

use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::model::WireItem;
use crate::storage::{MetricStore, StorageError};

/// Default snapshot file.
pub const DEFAULT_SNAPSHOT_PATH: &str = "metrics.json";

/// Default period between snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(300);

/// Snapshot worker settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    /// Snapshot file location.
    pub path: PathBuf,
    /// Period between saves. Zero disables periodic saves only.
    pub interval: Duration,
    /// Load the file on start.
    pub restore: bool,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            interval: DEFAULT_SNAPSHOT_INTERVAL,
            restore: true,
        }
    }
}

struct PeriodicTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Periodic snapshot and restore-on-start for a [`MetricStore`].
pub struct PersistenceWorker {
    store: Arc<dyn MetricStore>,
    config: SnapshotConfig,
    task: Mutex<Option<PeriodicTask>>,
}

impl std::fmt::Debug for PersistenceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceWorker")
            .field("config", &self.config)
            .field("running", &self.task.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl PersistenceWorker {
    pub fn new(store: Arc<dyn MetricStore>, config: SnapshotConfig) -> Self {
        Self {
            store,
            config,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Replay the snapshot file into the store.
    ///
    /// Returns the number of items loaded. A disabled restore or a missing
    /// file loads nothing. An unreadable file is an error.
    pub async fn load_from_file(&self) -> Result<usize, StorageError> {
        if !self.config.restore {
            return Ok(0);
        }

        let bytes = match tokio::fs::read(&self.config.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(path = %self.config.path.display(), "No snapshot file, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(e.into()),
        };

        let items: Vec<WireItem> = serde_json::from_slice(&bytes)?;
        for item in &items {
            self.store.apply(item).await?;
        }

        tracing::info!(
            path = %self.config.path.display(),
            items = items.len(),
            "Metrics restored from snapshot"
        );
        Ok(items.len())
    }

    /// Overwrite the snapshot file with every metric in the store.
    pub async fn save_to_file(&self) -> Result<usize, StorageError> {
        save_snapshot(self.store.as_ref(), &self.config.path).await
    }

    /// Load the snapshot, then start periodic saves if an interval is set.
    pub async fn run(&self) -> Result<(), StorageError> {
        self.load_from_file().await?;

        if self.config.interval.is_zero() {
            tracing::debug!("Periodic snapshots disabled");
            return Ok(());
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(periodic_save(
            Arc::clone(&self.store),
            self.config.path.clone(),
            self.config.interval,
            cancel.clone(),
        ));
        *task = Some(PeriodicTask { cancel, handle });

        tracing::info!(
            path = %self.config.path.display(),
            interval = ?self.config.interval,
            "Snapshot worker started"
        );
        Ok(())
    }

    /// Stop periodic saves, then write one final snapshot.
    ///
    /// The final save has completed when this returns.
    pub async fn stop(&self) -> Result<(), StorageError> {
        let task = self.task.lock().take();
        if let Some(PeriodicTask { cancel, handle }) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Snapshot task panicked");
            }
        }

        let saved = self.save_to_file().await?;
        tracing::info!(path = %self.config.path.display(), items = saved, "Final snapshot saved");
        Ok(())
    }
}

async fn periodic_save(
    store: Arc<dyn MetricStore>,
    path: PathBuf,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match save_snapshot(store.as_ref(), &path).await {
                    Ok(items) => tracing::debug!(items, "Snapshot saved"),
                    Err(e) => tracing::error!(error = %e, "Snapshot save failed"),
                }
            }
        }
    }
}

async fn save_snapshot(store: &dyn MetricStore, path: &Path) -> Result<usize, StorageError> {
    let items = store.get_metrics().await?.to_wire_items();
    let json = serde_json::to_vec(&items)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;

    Ok(items.len())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}
