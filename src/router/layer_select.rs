//! On-device layer selection gesture
//!
//! Holding both chord buttons enters select mode: each strip shows one layer
//! and its select LED lights if the slot is populated. Pressing a select
//! button commits that layer. Releasing the chord does not leave select mode.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};

use super::CHANNEL_COUNT;
use crate::mapping::layer_key;
use crate::xtouch::scribble::{ScribbleColor, ScribbleStyle};

fn default_left_chord() -> u8 {
    0
}

fn default_right_chord() -> u8 {
    7
}

fn default_select_base() -> u8 {
    24
}

/// Note numbers used by the gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct GestureNotes {
    /// Leftmost record button
    #[serde(default = "default_left_chord")]
    pub left_chord: u8,
    /// Rightmost record button
    #[serde(default = "default_right_chord")]
    pub right_chord: u8,
    /// Select button of strip 1; strips 2-8 follow
    #[serde(default = "default_select_base")]
    pub select_base: u8,
}

impl Default for GestureNotes {
    fn default() -> Self {
        Self {
            left_chord: default_left_chord(),
            right_chord: default_right_chord(),
            select_base: default_select_base(),
        }
    }
}

impl GestureNotes {
    pub fn select_notes(&self) -> impl Iterator<Item = u8> {
        let base = self.select_base;
        (0..CHANNEL_COUNT).map(move |i| base.saturating_add(i))
    }

    /// 0-based slot for a select button note
    pub fn select_slot(&self, note: u8) -> Option<usize> {
        let slot = note.checked_sub(self.select_base)?;
        (slot < CHANNEL_COUNT).then_some(slot as usize)
    }

    fn is_chord(&self, note: u8) -> bool {
        note == self.left_chord || note == self.right_chord
    }
}

/// What the device listener should do with a note after bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GestureAction {
    /// Not part of the gesture; route normally
    Pass,
    /// Part of the gesture; drop it
    Consume,
    /// Chord completed; show the layer picker
    Enter,
    /// Select button pressed in select mode
    Commit(usize),
}

/// Press bookkeeping and mode flag
#[derive(Debug, Default)]
pub struct GestureState {
    pressed: HashSet<u8>,
    in_select_mode: bool,
    /// Select button whose release still has to be swallowed after a commit
    pending_release: Option<u8>,
    /// Chord buttons whose press was routed; their release is routed too
    routed_chord: HashSet<u8>,
}

impl GestureState {
    pub fn in_select_mode(&self) -> bool {
        self.in_select_mode
    }

    pub fn reset(&mut self) {
        self.pressed.clear();
        self.in_select_mode = false;
    }

    /// Update bookkeeping for one note event and decide what to do with it
    pub(crate) fn on_note(
        &mut self,
        notes: &GestureNotes,
        note: u8,
        is_on: bool,
        layer_count: usize,
    ) -> GestureAction {
        if is_on {
            self.pressed.insert(note);
        } else {
            self.pressed.remove(&note);
        }

        if !self.in_select_mode {
            if !is_on && self.pending_release == Some(note) {
                self.pending_release = None;
                return GestureAction::Consume;
            }

            if notes.is_chord(note) {
                let chord_held = self.pressed.contains(&notes.left_chord)
                    && self.pressed.contains(&notes.right_chord);
                if is_on && chord_held {
                    self.in_select_mode = true;
                    return GestureAction::Enter;
                }
                if is_on {
                    self.routed_chord.insert(note);
                } else {
                    self.routed_chord.remove(&note);
                }
            }

            return GestureAction::Pass;
        }

        if notes.is_chord(note) {
            if !is_on && self.routed_chord.remove(&note) {
                return GestureAction::Pass;
            }
            return GestureAction::Consume;
        }

        match notes.select_slot(note) {
            Some(slot) if is_on && slot < layer_count => {
                self.reset();
                self.pending_release = Some(note);
                GestureAction::Commit(slot)
            }
            Some(slot) => {
                if is_on {
                    debug!("Select slot {} is empty, ignoring", slot + 1);
                }
                GestureAction::Consume
            }
            None => GestureAction::Pass,
        }
    }
}

impl super::Router {
    pub fn in_select_mode(&self) -> bool {
        self.gesture.lock().in_select_mode()
    }

    /// Run the gesture state machine for a note. Returns true if the note was
    /// consumed and must not be routed.
    pub(crate) async fn handle_gesture_note(&self, note: u8, is_on: bool) -> bool {
        let notes = self.ctx.gesture;
        let layer_count = self.ctx.store.snapshot().layer_names().len();

        let action = self
            .gesture
            .lock()
            .on_note(&notes, note, is_on, layer_count);

        match action {
            GestureAction::Pass => false,
            GestureAction::Consume => true,
            GestureAction::Enter => {
                info!("🎛️  Layer select mode");
                self.show_layer_picker().await;
                true
            }
            GestureAction::Commit(slot) => {
                let key = layer_key(slot);
                if let Err(e) = self.select_layer(&key).await {
                    warn!("Layer selection failed: {}", e);
                }
                true
            }
        }
    }

    /// One scribble and one LED write per slot: layer names on populated
    /// slots, blank strips and dark LEDs elsewhere.
    async fn show_layer_picker(&self) {
        let snapshot = self.ctx.store.snapshot();
        let names = snapshot.layer_names();
        let active = snapshot.active_index;

        for (slot, note) in self.ctx.gesture.select_notes().enumerate() {
            let channel = slot as u8 + 1;
            let (top, bottom, lit) = match names.get(slot) {
                Some(name) => (format!("Layer {}", channel), name.as_str(), true),
                None => (String::new(), "", false),
            };

            let style = ScribbleStyle {
                color: if lit {
                    ScribbleColor::Cyan
                } else {
                    ScribbleColor::Black
                },
                invert_top: false,
                invert_bottom: active == Some(slot),
            };

            if let Err(e) = self
                .ctx
                .device
                .write_scribble(channel, &top, bottom, style)
                .await
            {
                warn!("Failed to write scribble {}: {:#}", channel, e);
            }
            if let Err(e) = self.ctx.device.set_led(note, lit).await {
                warn!("Failed to set LED {}: {:#}", note, e);
            }
        }
    }
}
