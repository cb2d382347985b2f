//! Presets, layers and the active mapping table

pub mod preset;
pub mod store;
pub mod types;
pub mod watcher;

pub use store::{layer_key, parse_layer_key, LoadedPreset, MappingSnapshot, MappingStore};
pub use types::{ControlKind, DeviceSelector, Layer, MappingEntry, MappingError};
pub use watcher::PresetWatcher;
