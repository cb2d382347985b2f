//! Tests for Router module

use super::*;
use crate::events::{BridgeEvent, BroadcastSink};
use crate::mapping::MappingStore;
use crate::midi::{DeviceEvent, MidiMessage};
use crate::osc::{NetworkMessage, NetworkOutput, OscArg};
use crate::xtouch::DeviceOutput;
use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

#[derive(Default)]
struct RecordingDevice {
    sent: Mutex<Vec<MidiMessage>>,
}

impl RecordingDevice {
    fn take(&self) -> Vec<MidiMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl DeviceOutput for RecordingDevice {
    async fn send(&self, message: &MidiMessage) -> Result<()> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNetwork {
    sent: Mutex<Vec<NetworkMessage>>,
    fail: bool,
}

impl RecordingNetwork {
    fn take(&self) -> Vec<NetworkMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl NetworkOutput for RecordingNetwork {
    async fn send(&self, message: &NetworkMessage) -> Result<()> {
        if self.fail {
            bail!("socket closed");
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<BridgeEvent>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<BridgeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl BroadcastSink for RecordingSink {
    fn publish(&self, event: BridgeEvent) {
        self.events.lock().push(event);
    }
}

struct Harness {
    _dir: TempDir,
    router: Router,
    device: Arc<RecordingDevice>,
    network: Arc<RecordingNetwork>,
    sink: Arc<RecordingSink>,
}

fn write_preset(dir: &Path, layers: &[(&str, Value)]) {
    let names: Vec<&str> = layers.iter().map(|(name, _)| *name).collect();
    fs::write(dir.join("layer_index.json"), json!(names).to_string()).unwrap();
    for (i, (name, mappings)) in layers.iter().enumerate() {
        let body = json!({"name": name, "mappings": mappings});
        fs::write(dir.join(format!("layer_{}.json", i + 1)), body.to_string()).unwrap();
    }
}

fn harness_with(layers: &[(&str, Value)], network: RecordingNetwork) -> Harness {
    let dir = TempDir::new().unwrap();
    write_preset(dir.path(), layers);

    let device = Arc::new(RecordingDevice::default());
    let network = Arc::new(network);
    let sink = Arc::new(RecordingSink::default());
    let ctx = BridgeContext::new(
        Arc::new(MappingStore::open(dir.path())),
        device.clone(),
        network.clone(),
        sink.clone(),
    );

    Harness {
        _dir: dir,
        router: Router::new(ctx),
        device,
        network,
        sink,
    }
}

fn harness(layers: &[(&str, Value)]) -> Harness {
    harness_with(layers, RecordingNetwork::default())
}

/// Two layers; layer 1 maps controller 16 to channel 2's fader
fn default_preset() -> Vec<(&'static str, Value)> {
    vec![
        (
            "Mix",
            json!({
                "fader_2": {"osc": "/channel/2/fader", "midi_cc": 16},
                "mute_2": {"osc": "/channel/2/mute", "midi_note": 17}
            }),
        ),
        (
            "FX",
            json!({
                "knob_1": {"osc": "/fx/1/send", "midi_cc": 48}
            }),
        ),
    ]
}

fn cc(controller: u8, value: u8) -> DeviceEvent {
    DeviceEvent::ControlChange {
        controller,
        value,
        channel: 0,
    }
}

fn note(note: u8, is_on: bool) -> DeviceEvent {
    DeviceEvent::Note {
        note,
        velocity: if is_on { 127 } else { 0 },
        is_on,
        channel: 0,
    }
}

fn first_float(message: &NetworkMessage) -> f32 {
    match message.args.first() {
        Some(OscArg::Float(v)) => *v,
        other => panic!("expected float argument, got {:?}", other),
    }
}

fn is_scribble(message: &MidiMessage) -> bool {
    matches!(message, MidiMessage::SysEx { data } if data.starts_with(&[0x00, 0x00, 0x66, 0x58]))
}

fn is_led(message: &MidiMessage) -> bool {
    matches!(message, MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. })
}

fn layer_changes(events: &[BridgeEvent]) -> Vec<&BridgeEvent> {
    events
        .iter()
        .filter(|e| matches!(e, BridgeEvent::LayerChange { .. }))
        .collect()
}

#[tokio::test]
async fn test_fader_to_osc() {
    let h = harness(&default_preset());

    h.router.on_device_event(cc(16, 64)).await;

    let sent = h.network.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "/channel/2/fader");
    assert!((first_float(&sent[0]) - 0.504).abs() < 1e-3);

    assert_eq!(
        h.sink.take(),
        vec![BridgeEvent::UiUpdate {
            event: "fader".to_string(),
            channel: 2,
            value: json!(64),
        }]
    );
}

#[tokio::test]
async fn test_osc_to_fader() {
    let h = harness(&default_preset());

    let msg = NetworkMessage::new("/channel/2/fader", vec![OscArg::Float(1.0)]);
    h.router.on_network_message(&msg).await;

    assert_eq!(
        h.device.take(),
        vec![MidiMessage::ControlChange {
            channel: 0,
            controller: 16,
            value: 127
        }]
    );
    assert_eq!(
        h.sink.take(),
        vec![BridgeEvent::UiUpdate {
            event: "fader".to_string(),
            channel: 2,
            value: json!(127),
        }]
    );
}

#[tokio::test]
async fn test_osc_value_is_clamped() {
    let h = harness(&default_preset());

    h.router
        .on_network_message(&NetworkMessage::new("/channel/2/fader", vec![OscArg::Float(3.5)]))
        .await;
    h.router
        .on_network_message(&NetworkMessage::new("/channel/2/fader", vec![OscArg::Int(-2)]))
        .await;

    let values: Vec<u8> = h
        .device
        .take()
        .into_iter()
        .map(|m| match m {
            MidiMessage::ControlChange { value, .. } => value,
            other => panic!("unexpected {:?}", other),
        })
        .collect();
    assert_eq!(values, vec![127, 0]);
}

#[tokio::test]
async fn test_mute_is_boolean_for_observers() {
    let h = harness(&default_preset());

    h.router.on_device_event(note(17, true)).await;
    h.router.on_device_event(note(17, false)).await;

    let sent = h.network.take();
    assert_eq!(first_float(&sent[0]), 1.0);
    assert_eq!(first_float(&sent[1]), 0.0);

    let events = h.sink.take();
    assert_eq!(
        events,
        vec![
            BridgeEvent::UiUpdate {
                event: "mute".to_string(),
                channel: 2,
                value: json!(true),
            },
            BridgeEvent::UiUpdate {
                event: "mute".to_string(),
                channel: 2,
                value: json!(false),
            },
        ]
    );
}

#[tokio::test]
async fn test_osc_to_note_feedback() {
    let h = harness(&default_preset());

    for value in [1.0, 0.0] {
        let msg = NetworkMessage::new("/channel/2/mute", vec![OscArg::Float(value)]);
        h.router.on_network_message(&msg).await;
    }

    let sent = h.device.take();
    // LED off is a zero-velocity Note On on the wire
    assert_eq!(sent[1].encode(), vec![0x90, 17, 0]);
    assert_eq!(
        sent,
        vec![
            MidiMessage::NoteOn {
                channel: 0,
                note: 17,
                velocity: 127
            },
            MidiMessage::NoteOn {
                channel: 0,
                note: 17,
                velocity: 0
            },
        ]
    );
}

#[tokio::test]
async fn test_unmapped_device_event_passes_through() {
    let h = harness(&default_preset());

    h.router.on_device_event(cc(99, 10)).await;

    assert!(h.network.take().is_empty());
    assert_eq!(
        h.sink.take(),
        vec![BridgeEvent::Midi {
            raw: vec![0xB0, 99, 10]
        }]
    );
}

#[tokio::test]
async fn test_non_control_midi_passes_through() {
    let h = harness(&default_preset());

    h.router.on_midi_from_xtouch(&[0xE0, 0x00, 0x40]).await;

    assert!(h.network.take().is_empty());
    assert_eq!(
        h.sink.take(),
        vec![BridgeEvent::Midi {
            raw: vec![0xE0, 0x00, 0x40]
        }]
    );
}

#[tokio::test]
async fn test_unmapped_note_keeps_received_bytes() {
    let h = harness(&default_preset());

    // Zero-velocity Note On must not be republished as 0x80
    h.router.on_midi_from_xtouch(&[0x90, 99, 0x00]).await;

    assert_eq!(
        h.sink.take(),
        vec![BridgeEvent::Midi {
            raw: vec![0x90, 99, 0x00]
        }]
    );
}

#[tokio::test]
async fn test_routed_chord_button_gets_its_release() {
    let h = harness(&[(
        "Rec",
        json!({"rec_1": {"osc": "/channel/1/rec", "midi_note": 0}}),
    )]);

    h.router.on_device_event(note(0, true)).await;
    h.router.on_device_event(note(7, true)).await;
    assert!(h.router.in_select_mode());

    h.router.on_device_event(note(0, false)).await;
    h.router.on_device_event(note(7, false)).await;
    assert!(h.router.in_select_mode());

    let sent = h.network.take();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.address == "/channel/1/rec"));
    assert_eq!(first_float(&sent[0]), 1.0);
    assert_eq!(first_float(&sent[1]), 0.0);

    let rec_updates: Vec<_> = h
        .sink
        .take()
        .into_iter()
        .filter_map(|e| match e {
            BridgeEvent::UiUpdate { value, .. } => Some(value),
            _ => None,
        })
        .collect();
    assert_eq!(rec_updates, vec![json!(true), json!(false)]);
}

#[tokio::test]
async fn test_unmapped_osc_is_dropped() {
    let h = harness(&default_preset());

    let msg = NetworkMessage::new("/unknown", vec![OscArg::Float(0.5)]);
    h.router.on_network_message(&msg).await;

    assert!(h.device.take().is_empty());
    assert_eq!(h.sink.take(), vec![BridgeEvent::Network { raw: msg }]);
}

#[tokio::test]
async fn test_osc_without_number_is_dropped() {
    let h = harness(&default_preset());

    let msg = NetworkMessage::new("/channel/2/fader", vec![OscArg::Str("up".to_string())]);
    h.router.on_network_message(&msg).await;

    assert!(h.device.take().is_empty());
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_layer_isolation() {
    let h = harness(&default_preset());

    // knob_1 only exists in layer 2
    h.router.on_device_event(cc(48, 100)).await;
    assert!(h.network.take().is_empty());

    h.router.select_layer("layer_2").await.unwrap();
    h.router.on_device_event(cc(48, 100)).await;

    let sent = h.network.take();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].address, "/fx/1/send");
}

#[tokio::test]
async fn test_gesture_enters_select_mode_and_commits() {
    let h = harness(&default_preset());

    // Left chord alone does nothing special
    h.router.on_device_event(note(0, true)).await;
    assert!(!h.router.in_select_mode());
    h.device.take();

    // Both held: one scribble + one LED per slot
    h.router.on_device_event(note(7, true)).await;
    assert!(h.router.in_select_mode());

    let writes = h.device.take();
    assert_eq!(writes.iter().filter(|m| is_scribble(m)).count(), 8);
    let leds: Vec<_> = writes.iter().filter(|m| is_led(m)).collect();
    assert_eq!(leds.len(), 8);
    assert_eq!(
        leds.iter()
            .filter(|m| matches!(m, MidiMessage::NoteOn { velocity: 127, .. }))
            .count(),
        2
    );

    // Releasing the chord keeps select mode
    h.router.on_device_event(note(0, false)).await;
    h.router.on_device_event(note(7, false)).await;
    assert!(h.router.in_select_mode());
    h.sink.take();

    // Select button 2 commits layer 2
    h.router.on_device_event(note(25, true)).await;
    assert!(!h.router.in_select_mode());
    assert_eq!(h.router.layer_status().active_layer, "layer_2");

    let events = h.sink.take();
    let changes = layer_changes(&events);
    assert_eq!(changes.len(), 1);
    assert_eq!(
        *changes[0],
        BridgeEvent::LayerChange {
            active_layer: "layer_2".to_string(),
            layer_names: vec!["Mix".to_string(), "FX".to_string()],
            mapping_keys: vec!["knob_1".to_string()],
        }
    );

    // Normal labels restored, all select LEDs cleared
    let writes = h.device.take();
    assert_eq!(writes.iter().filter(|m| is_scribble(m)).count(), 8);
    assert!(writes
        .iter()
        .filter(|m| is_led(m))
        .all(|m| matches!(m, MidiMessage::NoteOn { velocity: 0, .. })));

    // The committing button's release is not routed
    h.router.on_device_event(note(25, false)).await;
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_empty_slot_is_ignored_in_select_mode() {
    let h = harness(&default_preset());
    h.router.on_device_event(note(0, true)).await;
    h.router.on_device_event(note(7, true)).await;
    h.sink.take();

    h.router.on_device_event(note(30, true)).await;
    assert!(h.router.in_select_mode());
    assert!(layer_changes(&h.sink.take()).is_empty());
    assert_eq!(h.router.layer_status().active_layer, "layer_1");
}

#[tokio::test]
async fn test_select_unknown_layer_keeps_current() {
    let h = harness(&default_preset());

    assert!(h.router.select_layer("layer_5").await.is_err());
    assert_eq!(h.router.layer_status().active_layer, "layer_1");
    assert!(h.sink.take().is_empty());
}

#[tokio::test]
async fn test_select_layer_picks_up_disk_edits() {
    let h = harness(&default_preset());

    let mut preset = default_preset();
    preset[1].1 = json!({"knob_2": {"osc": "/fx/2/send", "midi_cc": 49}});
    write_preset(h._dir.path(), &preset);

    h.router.select_layer("layer_2").await.unwrap();
    assert_eq!(h.router.layer_status().mapping_keys, vec!["knob_2".to_string()]);
}

#[tokio::test]
async fn test_reload_publishes_layer_change() {
    let h = harness(&default_preset());

    let mut preset = default_preset();
    preset[0].1 = json!({"fader_1": {"osc": "/channel/1/fader", "midi_cc": 15}});
    write_preset(h._dir.path(), &preset);

    h.router.reload_mapping().await;

    let events = h.sink.take();
    let changes = layer_changes(&events);
    assert_eq!(changes.len(), 1);
    assert!(matches!(
        changes[0],
        BridgeEvent::LayerChange { mapping_keys, .. } if mapping_keys == &vec!["fader_1".to_string()]
    ));

    h.router.on_device_event(cc(15, 127)).await;
    assert_eq!(h.network.take()[0].address, "/channel/1/fader");
}

#[tokio::test]
async fn test_send_failure_publishes_error() {
    let h = harness_with(
        &default_preset(),
        RecordingNetwork {
            fail: true,
            ..Default::default()
        },
    );

    h.router.on_device_event(cc(16, 1)).await;

    let events = h.sink.take();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[1], BridgeEvent::Error { .. }));
}

#[tokio::test]
async fn test_layer_status() {
    let h = harness(&default_preset());

    let status = h.router.layer_status();
    assert_eq!(status.active_layer, "layer_1");
    assert_eq!(status.active_layer_name, "Mix");
    assert_eq!(status.layer_names, vec!["Mix", "FX"]);
    assert_eq!(status.mapping_keys, vec!["fader_2", "mute_2"]);
    assert!(!status.in_select_mode);
}

#[tokio::test]
async fn test_empty_preset_routes_nothing() {
    let h = harness(&[]);

    h.router.on_device_event(cc(16, 64)).await;
    assert!(h.network.take().is_empty());
    assert_eq!(h.sink.take().len(), 1);

    // No layers: the chord still enters select mode with eight blank slots
    h.router.on_device_event(note(0, true)).await;
    h.router.on_device_event(note(7, true)).await;
    let writes = h.device.take();
    assert!(writes.iter().filter(|m| is_led(m)).all(|m| matches!(m, MidiMessage::NoteOn { velocity: 0, .. })));
}
