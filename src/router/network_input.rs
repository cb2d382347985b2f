//! OSC input handling: feedback from the network to the X-Touch

use tracing::{debug, warn};

use crate::events::BridgeEvent;
use crate::mapping::{DeviceSelector, MappingEntry};
use crate::midi::MidiMessage;
use crate::osc::NetworkMessage;

/// Rescale a network value into the entry's device range, clamped to what
/// the device accepts, rounded to the nearest step.
pub(crate) fn to_device_value(entry: &MappingEntry, value: f64) -> u8 {
    let scaled = entry
        .network_range
        .remap_into(value, &entry.device_range);
    let (lo, hi) = entry.device_range.bounds();
    let (lo, hi) = (lo.clamp(0.0, 127.0), hi.clamp(0.0, 127.0));

    if scaled.is_nan() {
        return lo.round() as u8;
    }
    scaled.clamp(lo, hi).round() as u8
}

impl super::Router {
    /// Route one inbound OSC message to the X-Touch
    pub async fn on_network_message(&self, message: &NetworkMessage) {
        let layer = self.ctx.store.active_mapping();
        let Some(entry) = layer.find_by_address(&message.address) else {
            debug!("No mapping for OSC {}", message);
            self.ctx.publish(BridgeEvent::Network {
                raw: message.clone(),
            });
            return;
        };

        let Some(value) = message.first_number() else {
            debug!("OSC {} has no numeric argument, dropping", message);
            return;
        };

        let device_value = to_device_value(entry, value);
        // The surface turns LEDs off with velocity 0 on a Note On; 0x80 is
        // only ever a button release
        let message = match entry.selector {
            DeviceSelector::Note(note) => MidiMessage::NoteOn {
                channel: entry.midi_channel,
                note,
                velocity: device_value,
            },
            DeviceSelector::ControlChange(controller) => MidiMessage::ControlChange {
                channel: entry.midi_channel,
                controller,
                value: device_value,
            },
        };

        debug!("← OSC {} → {} = {}", message, entry.key, device_value);

        if let Err(e) = self.ctx.device.send(&message).await {
            warn!("Failed to send feedback for {}: {:#}", entry.key, e);
        }

        self.ctx.publish(BridgeEvent::UiUpdate {
            event: entry.kind.to_string(),
            channel: entry.channel,
            value: super::ui_value(&entry.kind, device_value),
        });
    }
}
