//! X-Touch MIDI input handling and routing

use tracing::{debug, trace, warn};

use crate::events::BridgeEvent;
use crate::midi::{format_hex, DeviceEvent, MidiMessage};
use crate::osc::{NetworkMessage, OscArg};

impl super::Router {
    /// Process raw MIDI from the X-Touch
    pub async fn on_midi_from_xtouch(&self, raw: &[u8]) {
        let Some(message) = MidiMessage::parse(raw) else {
            trace!("Unsupported MIDI message: {}", format_hex(raw));
            return;
        };

        match DeviceEvent::from_message(&message) {
            Some(event) => self.route_device_event(event, raw).await,
            None => {
                trace!("Passing through {}", message);
                self.ctx.publish(BridgeEvent::Midi { raw: raw.to_vec() });
            }
        }
    }

    /// Route one device event that did not arrive as raw bytes
    pub async fn on_device_event(&self, event: DeviceEvent) {
        let raw = event.to_message().encode();
        self.route_device_event(event, &raw).await;
    }

    /// Route one device event.
    ///
    /// Note events go through the layer-select gesture first. Everything else
    /// is looked up in the active layer; the first entry bound to the event's
    /// controller/note wins. `raw` is what unmapped events are published as.
    async fn route_device_event(&self, event: DeviceEvent, raw: &[u8]) {
        if let DeviceEvent::Note { note, is_on, .. } = event {
            if self.handle_gesture_note(note, is_on).await {
                return;
            }
        }

        let layer = self.ctx.store.active_mapping();
        let Some(entry) = layer.find_by_event(&event) else {
            trace!("No mapping for {:?}", event);
            self.ctx.publish(BridgeEvent::Midi { raw: raw.to_vec() });
            return;
        };

        let value = event.raw_value();
        debug!("X-Touch control triggered: {} (raw {})", entry.key, value);

        self.ctx.publish(BridgeEvent::UiUpdate {
            event: entry.kind.to_string(),
            channel: entry.channel,
            value: super::ui_value(&entry.kind, value),
        });

        let Some(address) = entry.network_address.as_deref() else {
            return;
        };

        let scaled = entry
            .device_range
            .remap_into(value as f64, &entry.network_range);
        let message = NetworkMessage::new(address, vec![OscArg::Float(scaled as f32)]);

        debug!("→ OSC {}", message);
        if let Err(e) = self.ctx.network.send(&message).await {
            warn!("Failed to send {}: {:#}", message, e);
            self.ctx.publish(BridgeEvent::Error {
                message: format!("OSC send failed for {}: {}", address, e),
            });
        }
    }
}
