//! Router module - Core translation between the X-Touch and OSC
//!
//! The Router is the central orchestrator that manages:
//! - Device events → OSC messages through the active layer
//! - OSC messages → device feedback through the same layer
//! - The on-device layer selection gesture
//! - Layer change / reload notifications for observers

mod device_input;
mod layer_select;
mod network_input;

pub use layer_select::GestureNotes;

#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::context::BridgeContext;
use crate::events::BridgeEvent;
use crate::mapping::{ControlKind, MappingError, MappingSnapshot};
use crate::xtouch::scribble::{ScribbleColor, ScribbleStyle};
use layer_select::GestureState;

/// Number of strips / select buttons on the surface
pub const CHANNEL_COUNT: u8 = 8;

/// Layer summary served to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStatus {
    pub active_layer: String,
    pub active_layer_name: String,
    pub layer_names: Vec<String>,
    pub mapping_keys: Vec<String>,
    pub in_select_mode: bool,
}

/// Main router translating between the device and the network
pub struct Router {
    /// Shared collaborators
    pub(crate) ctx: BridgeContext,
    /// Layer-select gesture bookkeeping (device listener only)
    pub(crate) gesture: Mutex<GestureState>,
}

impl Router {
    /// Create a new Router over the given collaborators
    pub fn new(ctx: BridgeContext) -> Self {
        Self {
            ctx,
            gesture: Mutex::new(GestureState::default()),
        }
    }

    pub fn context(&self) -> &BridgeContext {
        &self.ctx
    }

    /// Current layer summary
    pub fn layer_status(&self) -> LayerStatus {
        let snapshot = self.ctx.store.snapshot();
        let active = snapshot.active_layer();
        LayerStatus {
            active_layer: snapshot.active_key(),
            active_layer_name: active.name.clone(),
            layer_names: snapshot.layer_names().to_vec(),
            mapping_keys: active.keys(),
            in_select_mode: self.in_select_mode(),
        }
    }

    /// Publish a `layer_change` event for `snapshot`
    pub(crate) fn publish_layer_change(&self, snapshot: &MappingSnapshot) {
        self.ctx.publish(BridgeEvent::LayerChange {
            active_layer: snapshot.active_key(),
            layer_names: snapshot.layer_names().to_vec(),
            mapping_keys: snapshot.active_layer().keys(),
        });
    }

    /// Re-read the preset after an on-disk change and notify observers
    pub async fn reload_mapping(&self) {
        info!("🔄 Reloading mapping (preset changed on disk)...");
        let snapshot = self.ctx.store.reload();

        if !self.in_select_mode() {
            self.show_channel_labels(&snapshot).await;
        }
        self.publish_layer_change(&snapshot);
    }

    /// Switch layer by key (API, or a select button in select mode).
    ///
    /// Leaves select mode, forces a reload to pick up on-disk edits, restores
    /// the normal display and publishes one `layer_change`.
    pub async fn select_layer(&self, key: &str) -> Result<(), MappingError> {
        self.ctx.store.set_active_layer(key)?;
        self.gesture.lock().reset();

        let snapshot = self.ctx.store.reload();
        self.show_channel_labels(&snapshot).await;
        self.publish_layer_change(&snapshot);

        info!("✅ Layer '{}' active", snapshot.active_key());
        Ok(())
    }

    /// Normal display: `Ch N` on top, active layer name below, select LEDs off
    pub async fn show_channel_labels(&self, snapshot: &MappingSnapshot) {
        let layer_name = snapshot.active_layer().name.clone();
        let style = ScribbleStyle::new(ScribbleColor::White);

        for ch in 1..=CHANNEL_COUNT {
            let top = format!("Ch {}", ch);
            if let Err(e) = self
                .ctx
                .device
                .write_scribble(ch, &top, &layer_name, style)
                .await
            {
                warn!("Failed to write scribble {}: {:#}", ch, e);
            }
        }

        self.clear_select_leds().await;
    }

    pub(crate) async fn clear_select_leds(&self) {
        for note in self.ctx.gesture.select_notes() {
            if let Err(e) = self.ctx.device.set_led(note, false).await {
                warn!("Failed to clear LED {}: {:#}", note, e);
            }
        }
    }

    /// Startup display for the active layer
    pub async fn init_display(&self) {
        let snapshot = self.ctx.store.snapshot();
        self.show_channel_labels(&snapshot).await;
    }
}

/// Value reported to observers for a routed control
pub(crate) fn ui_value(kind: &ControlKind, raw: u8) -> Value {
    if kind.is_boolean() {
        Value::Bool(raw == 127)
    } else {
        Value::from(raw)
    }
}

