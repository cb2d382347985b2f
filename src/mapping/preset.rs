//! Preset directory discovery and first-run defaults

use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::store::{layer_path, INDEX_FILE};

pub const DEFAULT_PRESET: &str = "Default";
pub const DEFAULT_LAYER_COUNT: usize = 8;

/// Names of the presets under `presets_dir` (directories holding an index), sorted
pub fn list_presets(presets_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(presets_dir) else {
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join(INDEX_FILE).is_file())
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    names
}

/// Write a preset with `DEFAULT_LAYER_COUNT` empty layers
pub fn create_default_preset(presets_dir: &Path, name: &str) -> Result<PathBuf> {
    let dir = presets_dir.join(name);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create preset directory: {}", dir.display()))?;

    let names: Vec<String> = (1..=DEFAULT_LAYER_COUNT)
        .map(|i| format!("Layer {}", i))
        .collect();

    let index = serde_json::to_string_pretty(&names)?;
    fs::write(dir.join(INDEX_FILE), index)
        .with_context(|| format!("Failed to write layer index in {}", dir.display()))?;

    for (i, layer_name) in names.iter().enumerate() {
        let body = serde_json::to_string_pretty(&json!({
            "name": layer_name,
            "mappings": {}
        }))?;
        let path = layer_path(&dir, i);
        fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    info!("Created default preset at {}", dir.display());
    Ok(dir)
}

/// Pick the preset directory to load.
///
/// Prefers `wanted`, then the first existing preset, and creates
/// [`DEFAULT_PRESET`] when none exist.
pub fn resolve_preset_dir(presets_dir: &Path, wanted: Option<&str>) -> Result<PathBuf> {
    let available = list_presets(presets_dir);

    if let Some(name) = wanted {
        if available.iter().any(|p| p == name) {
            return Ok(presets_dir.join(name));
        }
        warn!("Preset '{}' not found in {}", name, presets_dir.display());
    }

    match available.first() {
        Some(first) => {
            info!("Using preset '{}'", first);
            Ok(presets_dir.join(first))
        }
        None => create_default_preset(presets_dir, wanted.unwrap_or(DEFAULT_PRESET)),
    }
}
