//! MIDI utilities and message types
//!
//! Provides MIDI message parsing and encoding, the reduced `DeviceEvent`
//! view the router works with, and port lookup helpers.

use midir::MidiIO;
use std::fmt;
use tracing::{debug, warn};

/// Wire-level MIDI message.
///
/// Only what the surface actually speaks is decoded; any other complete
/// message is kept verbatim in `Other` so it can be passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    /// 14-bit value, 8192 is centre
    PitchBend { channel: u8, value: u16 },
    /// Payload between F0 and F7
    SysEx { data: Vec<u8> },
    Other { data: Vec<u8> },
}

/// Bytes a channel message occupies, status included
fn channel_message_len(status: u8) -> usize {
    match status & 0xF0 {
        0xC0 | 0xD0 => 2,
        _ => 3,
    }
}

impl MidiMessage {
    /// Decode one message. Truncated input, running status and unterminated
    /// SysEx yield None.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if status < 0x80 {
            return None;
        }

        if status == 0xF0 {
            let end = rest.iter().position(|&b| b == 0xF7)?;
            return Some(MidiMessage::SysEx {
                data: rest[..end].to_vec(),
            });
        }
        if status > 0xF0 {
            return Some(MidiMessage::Other { data: data.to_vec() });
        }

        let len = channel_message_len(status);
        if data.len() < len {
            return None;
        }
        let channel = status & 0x0F;
        let d1 = rest[0] & 0x7F;
        let d2 = rest.get(1).map_or(0, |b| b & 0x7F);

        let message = match status & 0xF0 {
            // Note On with velocity 0 is a Note Off
            0x90 if d2 > 0 => MidiMessage::NoteOn { channel, note: d1, velocity: d2 },
            0x80 | 0x90 => MidiMessage::NoteOff { channel, note: d1, velocity: d2 },
            0xB0 => MidiMessage::ControlChange { channel, controller: d1, value: d2 },
            0xE0 => MidiMessage::PitchBend {
                channel,
                value: ((d2 as u16) << 7) | d1 as u16,
            },
            _ => MidiMessage::Other {
                data: data[..len].to_vec(),
            },
        };
        Some(message)
    }

    /// Wire bytes for this message
    pub fn encode(&self) -> Vec<u8> {
        let status = |kind: u8, channel: u8| kind | (channel & 0x0F);
        match self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![status(0x80, *channel), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![status(0x90, *channel), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                vec![status(0xB0, *channel), controller & 0x7F, value & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => vec![
                status(0xE0, *channel),
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
            ],
            MidiMessage::SysEx { data } => std::iter::once(0xF0)
                .chain(data.iter().map(|b| b & 0x7F))
                .chain(std::iter::once(0xF7))
                .collect(),
            MidiMessage::Other { data } => data.clone(),
        }
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiMessage::NoteOff { channel, note, .. } => {
                write!(f, "NoteOff ch:{} n:{}", channel + 1, note)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::ControlChange { channel, controller, value } => {
                write!(f, "CC ch:{} #{} = {}", channel + 1, controller, value)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} {}", channel + 1, value)
            }
            MidiMessage::SysEx { data } => write!(f, "SysEx [{}]", format_hex(data)),
            MidiMessage::Other { data } => write!(f, "MIDI [{}]", format_hex(data)),
        }
    }
}

/// A control event from the surface, reduced to what routing needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    ControlChange { controller: u8, value: u8, channel: u8 },
    Note { note: u8, velocity: u8, is_on: bool, channel: u8 },
}

impl DeviceEvent {
    /// Reduce a parsed MIDI message; anything other than CC/notes yields None
    pub fn from_message(message: &MidiMessage) -> Option<Self> {
        match *message {
            MidiMessage::ControlChange { channel, controller, value } => Some(DeviceEvent::ControlChange {
                controller,
                value,
                channel,
            }),
            MidiMessage::NoteOn { channel, note, velocity } => Some(DeviceEvent::Note {
                note,
                velocity,
                is_on: velocity > 0,
                channel,
            }),
            MidiMessage::NoteOff { channel, note, .. } => Some(DeviceEvent::Note {
                note,
                velocity: 0,
                is_on: false,
                channel,
            }),
            _ => None,
        }
    }

    /// Build the wire message for this event
    pub fn to_message(&self) -> MidiMessage {
        match *self {
            DeviceEvent::ControlChange { controller, value, channel } => MidiMessage::ControlChange {
                channel,
                controller,
                value,
            },
            DeviceEvent::Note { note, velocity, is_on: true, channel } => MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            },
            DeviceEvent::Note { note, channel, .. } => MidiMessage::NoteOff {
                channel,
                note,
                velocity: 0,
            },
        }
    }

    /// Raw 7-bit value carried by the event (127/0 for note on/off)
    pub fn raw_value(&self) -> u8 {
        match *self {
            DeviceEvent::ControlChange { value, .. } => value,
            DeviceEvent::Note { is_on: true, .. } => 127,
            DeviceEvent::Note { .. } => 0,
        }
    }
}

/// `F0 7F 01` style dump for logs
pub fn format_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

/// List port names for a MIDI input or output
pub fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}

/// Pick a port by case-insensitive substring match, falling back to the
/// first available port. Returns None only when no ports exist.
pub fn select_port<T: MidiIO>(io: &T, pattern: &str) -> Option<(T::Port, String)> {
    let ports = io.ports();
    let needle = pattern.to_lowercase();

    if !needle.is_empty() {
        for port in &ports {
            if let Ok(name) = io.port_name(port) {
                if name.to_lowercase().contains(&needle) {
                    debug!("Found port '{}' matching pattern '{}'", name, pattern);
                    return Some((port.clone(), name));
                }
            }
        }
    }

    let first = ports.first()?;
    let name = io.port_name(first).unwrap_or_else(|_| "<unnamed>".to_string());
    warn!(
        "MIDI port '{}' not available. Using '{}' instead.",
        pattern, name
    );
    Some((first.clone(), name))
}
