//! Preset directory polling for hot reload
//!
//! Polls the newest modification time of the directory and its files. Each
//! change is reported once on a channel; the consumer performs the reload.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Newest mtime among `dir` and the files directly inside it
pub fn latest_mtime(dir: &Path) -> Option<SystemTime> {
    let mut latest = fs::metadata(dir).and_then(|m| m.modified()).ok();

    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                latest = latest.max(Some(modified));
            }
        }
    }

    latest
}

/// Polling watcher for one preset directory
pub struct PresetWatcher {
    rx: mpsc::Receiver<()>,
    _handle: JoinHandle<()>,
}

impl PresetWatcher {
    /// Start polling `dir` every `interval` until `shutdown` flips to true
    pub fn spawn(dir: PathBuf, interval: Duration, mut shutdown: watch::Receiver<bool>) -> Self {
        let (tx, rx) = mpsc::channel(4);

        let handle = tokio::spawn(async move {
            let mut last = latest_mtime(&dir);
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            info!(
                "Preset watcher started for {} (every {:?})",
                dir.display(),
                interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let current = latest_mtime(&dir);
                        if current != last {
                            debug!("Preset directory changed: {}", dir.display());
                            last = current;
                            if tx.send(()).await.is_err() {
                                break;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Preset watcher stopped");
        });

        Self {
            rx,
            _handle: handle,
        }
    }

    /// Wait for the next change notification.
    /// Returns None once the watcher has stopped.
    pub async fn next_change(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}
