//! Typed mapping entries and the on-disk layer format

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::warn;

use crate::midi::DeviceEvent;
use crate::remap::Range;

/// Errors raised while reading presets
#[derive(Debug, Error)]
pub enum MappingError {
    #[error("layer index not found: {0}")]
    MissingIndex(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("mapping '{key}' is invalid: {reason}")]
    InvalidEntry { key: String, reason: String },

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),
}

/// Control family, taken from the key prefix (`fader_2` is a fader)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlKind {
    Fader,
    Knob,
    Mute,
    Solo,
    Rec,
    Select,
    Button,
    Other(String),
}

impl ControlKind {
    pub fn from_prefix(prefix: &str) -> Self {
        match prefix.to_ascii_lowercase().as_str() {
            "fader" => Self::Fader,
            "knob" => Self::Knob,
            "mute" => Self::Mute,
            "solo" => Self::Solo,
            "rec" => Self::Rec,
            "select" => Self::Select,
            "button" => Self::Button,
            _ => Self::Other(prefix.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Fader => "fader",
            Self::Knob => "knob",
            Self::Mute => "mute",
            Self::Solo => "solo",
            Self::Rec => "rec",
            Self::Select => "select",
            Self::Button => "button",
            Self::Other(name) => name,
        }
    }

    /// On/off controls report a boolean to observers
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Self::Mute | Self::Solo | Self::Rec | Self::Select | Self::Button
        )
    }
}

impl fmt::Display for ControlKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the entry listens to on the device side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    ControlChange(u8),
    Note(u8),
}

impl DeviceSelector {
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        match (*self, *event) {
            (Self::ControlChange(cc), DeviceEvent::ControlChange { controller, .. }) => {
                cc == controller
            }
            (Self::Note(n), DeviceEvent::Note { note, .. }) => n == note,
            _ => false,
        }
    }

    pub fn is_note(&self) -> bool {
        matches!(self, Self::Note(_))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlChange(cc) => write!(f, "cc {}", cc),
            Self::Note(n) => write!(f, "note {}", n),
        }
    }
}

fn default_midi_min() -> f64 {
    0.0
}

fn default_midi_max() -> f64 {
    127.0
}

fn default_osc_min() -> f64 {
    0.0
}

fn default_osc_max() -> f64 {
    1.0
}

/// Mapping entry as stored in `layer_<n>.json`
#[derive(Debug, Clone, Deserialize)]
pub struct MappingEntryFile {
    #[serde(default)]
    pub osc: Option<String>,
    #[serde(default)]
    pub midi_cc: Option<u8>,
    #[serde(default)]
    pub midi_note: Option<u8>,
    #[serde(default = "default_midi_min")]
    pub midi_min: f64,
    #[serde(default = "default_midi_max")]
    pub midi_max: f64,
    #[serde(default = "default_osc_min")]
    pub osc_min: f64,
    #[serde(default = "default_osc_max")]
    pub osc_max: f64,
    #[serde(default)]
    pub midi_channel: u8,
    /// Explicit 1-based channel; overrides the key suffix
    #[serde(default)]
    pub channel: Option<u8>,
}

/// One control binding
#[derive(Debug, Clone, PartialEq)]
pub struct MappingEntry {
    /// Stable identifier used in files and events, e.g. `fader_2`
    pub key: String,
    pub kind: ControlKind,
    /// 1-based channel number reported to observers
    pub channel: u8,
    pub selector: DeviceSelector,
    pub network_address: Option<String>,
    pub device_range: Range,
    pub network_range: Range,
    /// 0-based MIDI channel used when writing back to the device
    pub midi_channel: u8,
}

impl MappingEntry {
    /// Build a typed entry from its key and file representation
    pub fn from_file(key: &str, file: MappingEntryFile) -> Result<Self, MappingError> {
        let selector = match (file.midi_cc, file.midi_note) {
            (Some(cc), None) => DeviceSelector::ControlChange(check_data_byte(key, "midi_cc", cc)?),
            (None, Some(note)) => DeviceSelector::Note(check_data_byte(key, "midi_note", note)?),
            (Some(_), Some(_)) => {
                return Err(MappingError::InvalidEntry {
                    key: key.to_string(),
                    reason: "both midi_cc and midi_note are set".to_string(),
                })
            }
            (None, None) => {
                return Err(MappingError::InvalidEntry {
                    key: key.to_string(),
                    reason: "neither midi_cc nor midi_note is set".to_string(),
                })
            }
        };

        if file.midi_channel > 15 {
            return Err(MappingError::InvalidEntry {
                key: key.to_string(),
                reason: format!("midi_channel {} is outside 0..=15", file.midi_channel),
            });
        }

        let (prefix, suffix) = match key.rsplit_once('_') {
            Some((prefix, suffix)) => (prefix, Some(suffix)),
            None => (key, None),
        };

        let channel = match file.channel {
            Some(channel) => channel,
            None => parse_channel(key, suffix),
        };

        Ok(Self {
            key: key.to_string(),
            kind: ControlKind::from_prefix(prefix),
            channel,
            selector,
            network_address: file.osc.filter(|addr| !addr.is_empty()),
            device_range: Range::new(file.midi_min, file.midi_max),
            network_range: Range::new(file.osc_min, file.osc_max),
            midi_channel: file.midi_channel,
        })
    }
}

fn check_data_byte(key: &str, field: &str, value: u8) -> Result<u8, MappingError> {
    if value > 127 {
        return Err(MappingError::InvalidEntry {
            key: key.to_string(),
            reason: format!("{} {} is outside 0..=127", field, value),
        });
    }
    Ok(value)
}

fn parse_channel(key: &str, suffix: Option<&str>) -> u8 {
    match suffix.and_then(|s| s.parse::<u8>().ok()) {
        Some(channel) => channel,
        None => {
            warn!("Cannot parse channel from mapping key '{}', using 1", key);
            1
        }
    }
}

/// Layer as stored in `layer_<n>.json`
#[derive(Debug, Default, Deserialize)]
pub struct LayerFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mappings: Map<String, Value>,
}

/// A named, ordered set of bindings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    pub name: String,
    /// Entries in file order; lookup is first-match
    pub mappings: Vec<MappingEntry>,
}

impl Layer {
    pub const fn empty() -> Self {
        Self {
            name: String::new(),
            mappings: Vec::new(),
        }
    }

    /// Build a layer, skipping invalid entries and rejecting duplicate selectors.
    ///
    /// When two entries claim the same device selector the first one is kept.
    pub fn from_file(file: LayerFile) -> Self {
        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(file.mappings.len());

        for (key, value) in file.mappings {
            let raw: MappingEntryFile = match serde_json::from_value(value) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Layer '{}': skipping mapping '{}': {}", file.name, key, e);
                    continue;
                }
            };

            let entry = match MappingEntry::from_file(&key, raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Layer '{}': {}", file.name, e);
                    continue;
                }
            };

            if !seen.insert(entry.selector) {
                warn!(
                    "Layer '{}': mapping '{}' reuses {} already claimed in this layer, ignoring it",
                    file.name, entry.key, entry.selector
                );
                continue;
            }

            mappings.push(entry);
        }

        Self {
            name: file.name,
            mappings,
        }
    }

    /// First entry bound to the device event
    pub fn find_by_event(&self, event: &DeviceEvent) -> Option<&MappingEntry> {
        self.mappings.iter().find(|m| m.selector.matches(event))
    }

    /// First entry bound to a network address
    pub fn find_by_address(&self, address: &str) -> Option<&MappingEntry> {
        self.mappings
            .iter()
            .find(|m| m.network_address.as_deref() == Some(address))
    }

    pub fn keys(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.key.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn layer(value: Value) -> Layer {
        Layer::from_file(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn test_entry_defaults() {
        let l = layer(json!({
            "name": "Mix",
            "mappings": {
                "fader_2": {"osc": "/channel/2/fader", "midi_cc": 16}
            }
        }));
        let entry = &l.mappings[0];
        assert_eq!(entry.kind, ControlKind::Fader);
        assert_eq!(entry.channel, 2);
        assert_eq!(entry.selector, DeviceSelector::ControlChange(16));
        assert_eq!(entry.device_range, Range::new(0.0, 127.0));
        assert_eq!(entry.network_range, Range::new(0.0, 1.0));
        assert_eq!(entry.midi_channel, 0);
    }

    #[test]
    fn test_unparsable_channel_defaults_to_one() {
        let l = layer(json!({
            "name": "X",
            "mappings": {
                "button_play": {"midi_note": 94},
                "transport": {"midi_note": 95}
            }
        }));
        assert_eq!(l.mappings[0].channel, 1);
        assert_eq!(l.mappings[0].kind, ControlKind::Button);
        assert_eq!(l.mappings[1].channel, 1);
        assert_eq!(l.mappings[1].kind, ControlKind::Other("transport".to_string()));
    }

    #[test]
    fn test_explicit_channel_wins() {
        let l = layer(json!({
            "name": "X",
            "mappings": {"knob_1": {"midi_cc": 48, "channel": 5}}
        }));
        assert_eq!(l.mappings[0].channel, 5);
    }

    #[test]
    fn test_selector_must_be_exactly_one() {
        let l = layer(json!({
            "name": "X",
            "mappings": {
                "mute_1": {"midi_cc": 1, "midi_note": 16},
                "mute_2": {"osc": "/m/2"},
                "mute_3": {"midi_note": 18},
                "fader_4": {"midi_cc": 200},
                "mute_5": {"midi_note": 128},
                "fader_6": {"midi_cc": 72, "midi_channel": 16},
                "fader_7": {"midi_cc": 72}
            }
        }));
        // 200 must not wrap onto controller 72 and steal fader_7's binding
        assert_eq!(l.keys(), vec!["mute_3".to_string(), "fader_7".to_string()]);
    }

    #[test]
    fn test_duplicate_selector_keeps_first() {
        let l = layer(json!({
            "name": "X",
            "mappings": {
                "fader_1": {"osc": "/a", "midi_cc": 70},
                "fader_2": {"osc": "/b", "midi_cc": 70},
                "mute_1": {"osc": "/c", "midi_note": 70}
            }
        }));
        assert_eq!(l.keys(), vec!["fader_1".to_string(), "mute_1".to_string()]);
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let l = layer(json!({
            "name": "X",
            "mappings": {
                "fader_1": {"midi_cc": "seventy"},
                "fader_2": {"midi_cc": 71}
            }
        }));
        assert_eq!(l.keys(), vec!["fader_2".to_string()]);
    }

    #[test]
    fn test_lookup_by_event_and_address() {
        let l = layer(json!({
            "name": "X",
            "mappings": {
                "fader_1": {"osc": "/ch/1", "midi_cc": 70},
                "mute_1": {"osc": "/ch/1/mute", "midi_note": 16}
            }
        }));
        let cc = DeviceEvent::ControlChange { controller: 70, value: 3, channel: 0 };
        let note = DeviceEvent::Note { note: 16, velocity: 127, is_on: true, channel: 0 };
        let other = DeviceEvent::Note { note: 70, velocity: 127, is_on: true, channel: 0 };
        assert_eq!(l.find_by_event(&cc).unwrap().key, "fader_1");
        assert_eq!(l.find_by_event(&note).unwrap().key, "mute_1");
        assert!(l.find_by_event(&other).is_none());
        assert_eq!(l.find_by_address("/ch/1/mute").unwrap().key, "mute_1");
        assert!(l.find_by_address("/nope").is_none());
    }

    #[test]
    fn test_boolean_kinds() {
        for kind in ["mute", "solo", "rec", "select", "button"] {
            assert!(ControlKind::from_prefix(kind).is_boolean());
        }
        assert!(!ControlKind::Fader.is_boolean());
        assert!(!ControlKind::Knob.is_boolean());
    }
}
