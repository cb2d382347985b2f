//! Scribble strip SysEx encoding
//!
//! One message per strip: `F0 00 00 66 58 <20+ch> <color> <7 top> <7 bottom> F7`.

use anyhow::{bail, Result};
use serde::Deserialize;

use crate::midi::MidiMessage;

/// Characters per scribble row
pub const ROW_WIDTH: usize = 7;

const HEADER: [u8; 4] = [0x00, 0x00, 0x66, 0x58];
const CHANNEL_BASE: u8 = 0x20;
const INVERT_TOP: u8 = 0x10;
const INVERT_BOTTOM: u8 = 0x20;
const PLACEHOLDER: u8 = b'?';

/// Backlight color of a strip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScribbleColor {
    Black = 0,
    Red = 1,
    Green = 2,
    Yellow = 3,
    Blue = 4,
    Magenta = 5,
    Cyan = 6,
    #[default]
    White = 7,
}

/// Color byte: background plus inverted-text flags per row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScribbleStyle {
    pub color: ScribbleColor,
    pub invert_top: bool,
    pub invert_bottom: bool,
}

impl ScribbleStyle {
    pub const fn new(color: ScribbleColor) -> Self {
        Self {
            color,
            invert_top: false,
            invert_bottom: false,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.color as u8;
        if self.invert_top {
            byte |= INVERT_TOP;
        }
        if self.invert_bottom {
            byte |= INVERT_BOTTOM;
        }
        byte
    }
}

/// Left-justify and pad/truncate to exactly one row; non-printable ASCII becomes `?`
pub fn format_row(text: &str) -> [u8; ROW_WIDTH] {
    let mut row = [b' '; ROW_WIDTH];
    for (slot, c) in row.iter_mut().zip(text.chars()) {
        *slot = if c.is_ascii() && !c.is_ascii_control() {
            c as u8
        } else {
            PLACEHOLDER
        };
    }
    row
}

/// Build the SysEx for one strip. `channel` is 1-based (1..=8).
pub fn scribble_message(
    channel: u8,
    top: &str,
    bottom: &str,
    style: ScribbleStyle,
) -> Result<MidiMessage> {
    if !(1..=8).contains(&channel) {
        bail!("Invalid scribble channel: {} (must be 1-8)", channel);
    }

    let mut data = Vec::with_capacity(HEADER.len() + 2 + 2 * ROW_WIDTH);
    data.extend_from_slice(&HEADER);
    data.push(CHANNEL_BASE + channel - 1);
    data.push(style.to_byte());
    data.extend_from_slice(&format_row(top));
    data.extend_from_slice(&format_row(bottom));

    Ok(MidiMessage::SysEx { data })
}
