//! Application path management.
//!
//! Presets live in the per-user config directory
//! (`%APPDATA%\XCTL_OSC\presets`, `~/.config/XCTL_OSC/presets`, ...) unless
//! the configuration overrides it. In debug builds a `presets/` folder in the
//! working directory takes precedence, which keeps `cargo run` self-contained.

use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Application name used for per-user directories
const APP_NAME: &str = "XCTL_OSC";

/// Resolved application paths
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Path to the configuration file
    pub config: PathBuf,
    /// Directory holding one folder per preset
    pub presets_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the CLI config path and an optional preset dir override
    pub fn resolve(config: impl Into<PathBuf>, presets_override: Option<&Path>) -> Self {
        let config = config.into();
        let presets_dir = match presets_override {
            Some(dir) => dir.to_path_buf(),
            None => Self::default_presets_dir(),
        };

        Self {
            config,
            presets_dir,
        }
    }

    /// Default preset directory for this user
    pub fn default_presets_dir() -> PathBuf {
        #[cfg(debug_assertions)]
        {
            let local = PathBuf::from("presets");
            if local.is_dir() {
                return local;
            }
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("presets")
    }

    /// Ensure the preset directory exists
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        if !self.presets_dir.exists() {
            debug!("Creating presets directory: {}", self.presets_dir.display());
            std::fs::create_dir_all(&self.presets_dir).with_context(|| {
                format!(
                    "Failed to create presets directory: {}",
                    self.presets_dir.display()
                )
            })?;
        }
        Ok(())
    }
}
