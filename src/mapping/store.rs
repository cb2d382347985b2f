//! Active mapping store with atomic reload
//!
//! The whole preset (index, layers, active pointer) lives in one immutable
//! snapshot behind `RwLock<Arc<_>>`. Writers build a new snapshot off-lock and
//! swap it in; readers clone the `Arc` and never see a half-built table.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{Layer, LayerFile, MappingError};

pub const INDEX_FILE: &str = "layer_index.json";

/// Key used for the layer at `index` (0-based), e.g. `layer_1`
pub fn layer_key(index: usize) -> String {
    format!("layer_{}", index + 1)
}

/// Inverse of [`layer_key`]
pub fn parse_layer_key(key: &str) -> Option<usize> {
    key.strip_prefix("layer_")?
        .parse::<usize>()
        .ok()?
        .checked_sub(1)
}

/// Layer file path for the layer at `index` (0-based)
pub fn layer_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.json", layer_key(index)))
}

/// A preset as read from disk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedPreset {
    /// Layer names in select-button order
    pub layer_names: Vec<String>,
    /// Layers, parallel to `layer_names`
    pub layers: Vec<Arc<Layer>>,
}

impl LoadedPreset {
    /// Read the index and every layer file.
    ///
    /// Only a missing or malformed index is an error. A missing or malformed
    /// layer file yields an empty layer under the index name.
    pub fn load(dir: &Path) -> Result<Self, MappingError> {
        let index_path = dir.join(INDEX_FILE);
        if !index_path.exists() {
            return Err(MappingError::MissingIndex(index_path));
        }

        let layer_names: Vec<String> = read_json(&index_path)?;
        let mut layers = Vec::with_capacity(layer_names.len());

        for (i, name) in layer_names.iter().enumerate() {
            let path = layer_path(dir, i);
            let file = match read_json::<LayerFile>(&path) {
                Ok(file) => file,
                Err(e) => {
                    warn!("Layer '{}' treated as empty: {}", name, e);
                    LayerFile::default()
                }
            };

            let mut layer = Layer::from_file(file);
            if layer.name.is_empty() {
                layer.name = name.clone();
            }
            debug!(
                "Loaded {} '{}' with {} mapping(s)",
                layer_key(i),
                layer.name,
                layer.mappings.len()
            );
            layers.push(Arc::new(layer));
        }

        Ok(Self {
            layer_names,
            layers,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, MappingError> {
    let text = std::fs::read_to_string(path).map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| MappingError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Immutable view of the store at one point in time
#[derive(Debug, Clone)]
pub struct MappingSnapshot {
    pub preset: LoadedPreset,
    /// Index of the active layer; None when the preset has no layers
    pub active_index: Option<usize>,
    active: Arc<Layer>,
}

impl MappingSnapshot {
    fn new(preset: LoadedPreset, active_index: Option<usize>) -> Self {
        let active_index = active_index
            .filter(|i| *i < preset.layers.len())
            .or(if preset.layers.is_empty() { None } else { Some(0) });
        let active = match active_index {
            Some(i) => preset.layers[i].clone(),
            None => Arc::new(Layer::empty()),
        };
        Self {
            preset,
            active_index,
            active,
        }
    }

    /// The layer currently used for routing
    pub fn active_layer(&self) -> &Arc<Layer> {
        &self.active
    }

    /// Key of the active layer, empty when there is none
    pub fn active_key(&self) -> String {
        self.active_index.map(layer_key).unwrap_or_default()
    }

    pub fn layer_names(&self) -> &[String] {
        &self.preset.layer_names
    }
}

/// Owns the active mapping table and the preset it came from
pub struct MappingStore {
    dir: RwLock<PathBuf>,
    state: RwLock<Arc<MappingSnapshot>>,
}

impl MappingStore {
    /// Load a preset directory and activate its first layer.
    ///
    /// An unreadable preset leaves the store with an empty table.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let preset = Self::load_or_empty(&dir);
        info!(
            "Loaded preset from {} ({} layer(s))",
            dir.display(),
            preset.layers.len()
        );
        Self {
            dir: RwLock::new(dir),
            state: RwLock::new(Arc::new(MappingSnapshot::new(preset, Some(0)))),
        }
    }

    fn load_or_empty(dir: &Path) -> LoadedPreset {
        match LoadedPreset::load(dir) {
            Ok(preset) => preset,
            Err(e) => {
                warn!("Using an empty mapping table: {}", e);
                LoadedPreset::default()
            }
        }
    }

    /// Directory the store reloads from
    pub fn dir(&self) -> PathBuf {
        self.dir.read().clone()
    }

    /// Re-read the preset directory and swap the table in one step.
    ///
    /// The active layer is kept when its key still exists, otherwise the
    /// first layer (or an empty one) becomes active.
    pub fn reload(&self) -> Arc<MappingSnapshot> {
        let dir = self.dir();
        let preset = Self::load_or_empty(&dir);

        let mut state = self.state.write();
        let previous = state.active_index;
        let next = Arc::new(MappingSnapshot::new(preset, previous));

        if previous.is_some() && previous != next.active_index {
            warn!(
                "Active layer {} no longer exists, falling back to '{}'",
                previous.map(layer_key).unwrap_or_default(),
                next.active_key()
            );
        }

        *state = next.clone();
        drop(state);
        info!(
            "Mapping reloaded: {} layer(s), active '{}'",
            next.preset.layers.len(),
            next.active_key()
        );
        next
    }

    /// Switch to an already loaded layer. Unknown keys leave the current layer active.
    pub fn set_active_layer(&self, key: &str) -> Result<(), MappingError> {
        let mut state = self.state.write();

        let index = match parse_layer_key(key) {
            Some(i) if i < state.preset.layers.len() => i,
            _ => {
                warn!("Unknown layer '{}', keeping '{}'", key, state.active_key());
                return Err(MappingError::UnknownLayer(key.to_string()));
            }
        };

        let next = MappingSnapshot::new(state.preset.clone(), Some(index));
        info!("Active layer: {} ('{}')", key, next.active.name);
        *state = Arc::new(next);
        Ok(())
    }

    /// Layer used for routing right now
    pub fn active_mapping(&self) -> Arc<Layer> {
        self.state.read().active.clone()
    }

    /// Full consistent view (index, layers, active pointer)
    pub fn snapshot(&self) -> Arc<MappingSnapshot> {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_preset(dir: &Path, layers: &[(&str, serde_json::Value)]) {
        let names: Vec<&str> = layers.iter().map(|(name, _)| *name).collect();
        fs::write(dir.join(INDEX_FILE), serde_json::to_string(&names).unwrap()).unwrap();
        for (i, (name, mappings)) in layers.iter().enumerate() {
            let body = json!({"name": name, "mappings": mappings});
            fs::write(layer_path(dir, i), body.to_string()).unwrap();
        }
    }

    #[test]
    fn test_layer_keys() {
        assert_eq!(layer_key(0), "layer_1");
        assert_eq!(parse_layer_key("layer_8"), Some(7));
        assert_eq!(parse_layer_key("layer_0"), None);
        assert_eq!(parse_layer_key("page_1"), None);
    }

    #[test]
    fn test_load_preset() {
        let tmp = TempDir::new().unwrap();
        write_preset(
            tmp.path(),
            &[
                ("Mix", json!({"fader_1": {"osc": "/a", "midi_cc": 70}})),
                ("FX", json!({})),
            ],
        );

        let preset = LoadedPreset::load(tmp.path()).unwrap();
        assert_eq!(preset.layer_names, vec!["Mix", "FX"]);
        assert_eq!(preset.layers[0].mappings.len(), 1);
        assert!(preset.layers[1].is_empty());
    }

    #[test]
    fn test_bad_layer_file_is_empty_layer() {
        let tmp = TempDir::new().unwrap();
        write_preset(tmp.path(), &[("A", json!({})), ("B", json!({}))]);
        fs::write(layer_path(tmp.path(), 0), "{not json").unwrap();
        fs::remove_file(layer_path(tmp.path(), 1)).unwrap();

        let preset = LoadedPreset::load(tmp.path()).unwrap();
        assert_eq!(preset.layers.len(), 2);
        assert!(preset.layers[0].is_empty());
        assert_eq!(preset.layers[0].name, "A");
        assert_eq!(preset.layers[1].name, "B");
    }

    #[test]
    fn test_missing_index_gives_empty_store() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            LoadedPreset::load(tmp.path()),
            Err(MappingError::MissingIndex(_))
        ));

        let store = MappingStore::open(tmp.path());
        assert!(store.active_mapping().is_empty());
        assert_eq!(store.snapshot().active_index, None);
        assert_eq!(store.snapshot().active_key(), "");
    }

    #[test]
    fn test_set_active_layer() {
        let tmp = TempDir::new().unwrap();
        write_preset(
            tmp.path(),
            &[
                ("A", json!({"fader_1": {"osc": "/a", "midi_cc": 70}})),
                ("B", json!({"fader_1": {"osc": "/b", "midi_cc": 70}})),
            ],
        );
        let store = MappingStore::open(tmp.path());
        assert_eq!(store.snapshot().active_key(), "layer_1");

        store.set_active_layer("layer_2").unwrap();
        assert_eq!(store.active_mapping().name, "B");

        assert!(store.set_active_layer("layer_9").is_err());
        assert!(store.set_active_layer("bogus").is_err());
        assert_eq!(store.active_mapping().name, "B");
    }

    #[test]
    fn test_reload_keeps_active_layer() {
        let tmp = TempDir::new().unwrap();
        write_preset(tmp.path(), &[("A", json!({})), ("B", json!({}))]);
        let store = MappingStore::open(tmp.path());
        store.set_active_layer("layer_2").unwrap();

        write_preset(
            tmp.path(),
            &[
                ("A", json!({})),
                ("B2", json!({"mute_1": {"osc": "/m", "midi_note": 16}})),
            ],
        );
        let snapshot = store.reload();
        assert_eq!(snapshot.active_key(), "layer_2");
        assert_eq!(store.active_mapping().name, "B2");
        assert_eq!(store.active_mapping().mappings.len(), 1);
    }

    #[test]
    fn test_reload_falls_back_to_first_layer() {
        let tmp = TempDir::new().unwrap();
        write_preset(tmp.path(), &[("A", json!({})), ("B", json!({})), ("C", json!({}))]);
        let store = MappingStore::open(tmp.path());
        store.set_active_layer("layer_3").unwrap();

        write_preset(tmp.path(), &[("A", json!({}))]);
        let snapshot = store.reload();
        assert_eq!(snapshot.active_key(), "layer_1");
        assert_eq!(store.active_mapping().name, "A");
    }

    #[test]
    fn test_reload_with_no_layers_is_empty() {
        let tmp = TempDir::new().unwrap();
        write_preset(tmp.path(), &[("A", json!({"fader_1": {"midi_cc": 70}}))]);
        let store = MappingStore::open(tmp.path());

        write_preset(tmp.path(), &[]);
        let snapshot = store.reload();
        assert_eq!(snapshot.active_index, None);
        assert!(store.active_mapping().is_empty());
    }

    #[test]
    fn test_reload_is_atomic_for_readers() {
        let tmp = TempDir::new().unwrap();
        let mappings = |prefix: &str| {
            let mut m = serde_json::Map::new();
            for ch in 1..=8 {
                m.insert(
                    format!("fader_{}", ch),
                    json!({"osc": format!("/{}/{}", prefix, ch), "midi_cc": 69 + ch}),
                );
            }
            serde_json::Value::Object(m)
        };
        write_preset(tmp.path(), &[("Old", mappings("old"))]);
        let store = Arc::new(MappingStore::open(tmp.path()));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let layer = store.active_mapping();
                        let prefixes: std::collections::HashSet<_> = layer
                            .mappings
                            .iter()
                            .filter_map(|m| m.network_address.as_deref())
                            .map(|a| a.split('/').nth(1).unwrap_or_default().to_string())
                            .collect();
                        assert!(prefixes.len() <= 1, "mixed table: {:?}", prefixes);
                    }
                })
            })
            .collect();

        for i in 0..20 {
            let prefix = if i % 2 == 0 { "new" } else { "old" };
            write_preset(tmp.path(), &[("Layer", mappings(prefix))]);
            store.reload();
        }

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
