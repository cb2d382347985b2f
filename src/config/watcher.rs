//! Config file hot reload
//!
//! The parent directory is watched rather than the file itself, so editors
//! that save by rename keep triggering reloads. Reloads that parse to the
//! config already in effect are not forwarded.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Let writers finish before re-reading
const DEBOUNCE: Duration = Duration::from_millis(100);

pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load `config_path` and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        let initial = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;
        let last = Arc::new(Mutex::new(initial.clone()));

        let path = PathBuf::from(&config_path);
        let file_name = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        // notify runs callbacks on its own thread
        let runtime = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    error!("Config watch error: {}", e);
                    return;
                }
            };

            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            let touches_config = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_config {
                return;
            }

            debug!("Config file event: {:?}", event.kind);
            let config_path = config_path.clone();
            let tx = tx.clone();
            let last = last.clone();

            runtime.spawn(async move {
                tokio::time::sleep(DEBOUNCE).await;

                let new_config = match AppConfig::load(&config_path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Failed to reload config (keeping old config): {:#}", e);
                        return;
                    }
                };

                {
                    let mut last = last.lock();
                    if *last == new_config {
                        debug!("Config unchanged after file event");
                        return;
                    }
                    *last = new_config.clone();
                }

                info!("Configuration reloaded");
                if tx.send(new_config).await.is_err() {
                    debug!("Config watcher receiver dropped");
                }
            });
        })?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory: {}", dir.display()))?;

        info!("Watching {} for changes", path.display());

        Ok((
            Self {
                _watcher: watcher,
                rx,
            },
            Arc::new(initial),
        ))
    }

    /// Next changed config; None once the watcher is gone
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}
