//! Configuration management for XCTL OSC
//!
//! Handles loading, parsing, and hot-reloading of YAML configuration files.

pub mod watcher;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::router::GestureNotes;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub midi: MidiConfig,
    #[serde(default)]
    pub osc: OscConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
    #[serde(default)]
    pub xtouch: XTouchConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// MIDI port name patterns (case-insensitive substring match)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiConfig {
    #[serde(default = "default_port_pattern")]
    pub input_port: String,
    #[serde(default = "default_port_pattern")]
    pub output_port: String,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_port: default_port_pattern(),
            output_port: default_port_pattern(),
        }
    }
}

/// OSC endpoints
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OscConfig {
    #[serde(default = "default_osc_input_host")]
    pub input_host: String,
    #[serde(default = "default_osc_input_port")]
    pub input_port: u16,
    #[serde(default = "default_osc_output_ip")]
    pub output_ip: String,
    #[serde(default = "default_osc_output_port")]
    pub output_port: u16,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            input_host: default_osc_input_host(),
            input_port: default_osc_input_port(),
            output_ip: default_osc_output_ip(),
            output_port: default_osc_output_port(),
        }
    }
}

/// Preset location and reload polling
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PresetsConfig {
    /// Directory holding one folder per preset (defaults to the user config dir)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Preset to load at startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    #[serde(default = "default_reload_poll_ms")]
    pub reload_poll_ms: u64,
}

impl Default for PresetsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            active: None,
            reload_poll_ms: default_reload_poll_ms(),
        }
    }
}

impl PresetsConfig {
    pub fn reload_poll_interval(&self) -> Duration {
        Duration::from_millis(self.reload_poll_ms)
    }
}

/// X-Touch specific settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct XTouchConfig {
    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,
    #[serde(default)]
    pub layer_select: GestureNotes,
}

impl Default for XTouchConfig {
    fn default() -> Self {
        Self {
            handshake_interval_ms: default_handshake_interval_ms(),
            layer_select: GestureNotes::default(),
        }
    }
}

impl XTouchConfig {
    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }
}

/// Observer API
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiConfig {
    /// First port tried; the next free one is used if taken
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file, written in addition to stdout
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// Default value functions
fn default_port_pattern() -> String {
    "X-Touch".to_string()
}

fn default_osc_input_host() -> String {
    "127.0.0.1".to_string()
}

fn default_osc_input_port() -> u16 {
    9000
}

fn default_osc_output_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_osc_output_port() -> u16 {
    1200
}

fn default_reload_poll_ms() -> u64 {
    1000
}

fn default_handshake_interval_ms() -> u64 {
    6000
}

fn default_api_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a YAML file
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config = Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path))?;

        Ok(config)
    }

    /// Parse and validate configuration text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        // An empty file is a valid all-defaults config
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.osc.output_ip.trim().is_empty() {
            anyhow::bail!("osc.output_ip cannot be empty");
        }
        if self.osc.output_port == 0 {
            anyhow::bail!("osc.output_port must be a valid port");
        }
        if self.presets.reload_poll_ms == 0 {
            anyhow::bail!("presets.reload_poll_ms must be greater than 0");
        }
        if self.xtouch.handshake_interval_ms == 0 {
            anyhow::bail!("xtouch.handshake_interval_ms must be greater than 0");
        }

        let notes = &self.xtouch.layer_select;
        if notes.left_chord == notes.right_chord {
            anyhow::bail!("xtouch.layer_select chord notes must differ");
        }
        for note in [notes.left_chord, notes.right_chord] {
            if note > 127 {
                anyhow::bail!("xtouch.layer_select note {} out of range", note);
            }
            if notes.select_slot(note).is_some() {
                anyhow::bail!(
                    "xtouch.layer_select chord note {} overlaps the select buttons",
                    note
                );
            }
        }
        if notes.select_base > 120 {
            anyhow::bail!(
                "xtouch.layer_select.select_base {} leaves no room for 8 buttons",
                notes.select_base
            );
        }

        Ok(())
    }
}
