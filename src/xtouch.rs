//! Behringer X-Touch driver
//!
//! Handles MIDI communication with the X-Touch control surface.

pub mod handshake;
pub mod scribble;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use midir::{MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::midi::{format_hex, port_names, select_port, MidiMessage};
use scribble::{scribble_message, ScribbleStyle};

/// Outbound side of the device protocol
#[async_trait]
pub trait DeviceOutput: Send + Sync {
    async fn send(&self, message: &MidiMessage) -> Result<()>;

    /// Button LED on/off. Off is a Note On with velocity 0; the surface
    /// reads 0x80 as a button release, not as LED control.
    async fn set_led(&self, note: u8, on: bool) -> Result<()> {
        let message = MidiMessage::NoteOn {
            channel: 0,
            note,
            velocity: if on { 127 } else { 0 },
        };
        self.send(&message).await
    }

    /// Write both rows of a scribble strip (channel 1-8)
    async fn write_scribble(
        &self,
        channel: u8,
        top: &str,
        bottom: &str,
        style: ScribbleStyle,
    ) -> Result<()> {
        let message = scribble_message(channel, top, bottom, style)?;
        self.send(&message).await
    }
}

/// MIDI event from X-Touch
#[derive(Debug, Clone)]
pub struct XTouchEvent {
    pub timestamp: Instant,
    pub message: MidiMessage,
    pub raw_data: Vec<u8>,
}

/// Shared, serialized MIDI output
pub struct XTouchOutput {
    conn: Mutex<Option<MidiOutputConnection>>,
    port_name: String,
}

impl XTouchOutput {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Close the port; later sends fail
    pub fn close(&self) {
        if let Some(conn) = self.conn.lock().take() {
            conn.close();
        }
    }
}

#[async_trait]
impl DeviceOutput for XTouchOutput {
    async fn send(&self, message: &MidiMessage) -> Result<()> {
        let data = message.encode();

        let mut guard = self.conn.lock();
        let conn = guard
            .as_mut()
            .ok_or_else(|| anyhow!("Not connected to output port"))?;
        conn.send(&data).context("Failed to send MIDI message")?;
        drop(guard);

        trace!("Sent: {} | {}", format_hex(&data), message);
        Ok(())
    }
}

/// X-Touch driver for hardware communication
pub struct XTouchDriver {
    /// MIDI input connection
    input_conn: Option<MidiInputConnection<()>>,

    /// MIDI output, shared with the router and handshake timer
    output: Option<Arc<XTouchOutput>>,

    /// Event sender for incoming MIDI
    event_tx: mpsc::Sender<XTouchEvent>,

    /// Event receiver
    event_rx: Option<mpsc::Receiver<XTouchEvent>>,

    /// Input port name pattern
    input_port_name: String,

    /// Output port name pattern
    output_port_name: String,
}

impl XTouchDriver {
    /// Create a new X-Touch driver
    pub fn new(input_port_name: impl Into<String>, output_port_name: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(1000);

        Self {
            input_conn: None,
            output: None,
            event_tx,
            event_rx: Some(event_rx),
            input_port_name: input_port_name.into(),
            output_port_name: output_port_name.into(),
        }
    }

    /// List available MIDI input and output port names
    pub fn list_ports() -> Result<(Vec<String>, Vec<String>)> {
        let midi_in = MidiInput::new("XCTL-OSC-Scanner")?;
        let midi_out = MidiOutput::new("XCTL-OSC-Scanner")?;
        Ok((port_names(&midi_in), port_names(&midi_out)))
    }

    /// Connect to X-Touch MIDI ports.
    ///
    /// Unknown port names fall back to the first available port; having no
    /// port at all is an error.
    pub fn connect(&mut self) -> Result<Arc<XTouchOutput>> {
        self.disconnect();

        info!(
            "Connecting to X-Touch - Input: '{}', Output: '{}'",
            self.input_port_name, self.output_port_name
        );

        // Input
        let midi_in = MidiInput::new("XCTL-OSC-Input").context("Failed to create MIDI input")?;
        debug!("Found {} MIDI input ports", midi_in.port_count());

        let (in_port, in_name) = select_port(&midi_in, &self.input_port_name)
            .ok_or_else(|| anyhow!("No available MIDI input ports found"))?;

        info!("Connecting to input port: {}", in_name);

        let event_tx = self.event_tx.clone();
        let input_conn = midi_in
            .connect(
                &in_port,
                "XCTL-OSC",
                move |_timestamp, data, _| {
                    let timestamp = Instant::now();

                    if let Some(message) = MidiMessage::parse(data) {
                        let event = XTouchEvent {
                            timestamp,
                            message,
                            raw_data: data.to_vec(),
                        };

                        // Never block the MIDI callback thread
                        if event_tx.try_send(event).is_err() {
                            warn!("X-Touch event queue full, dropping {}", format_hex(data));
                        }
                    } else {
                        debug!("Failed to parse MIDI: {}", format_hex(data));
                    }
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect to input port '{}': {}", in_name, e))?;

        // Output
        let midi_out =
            MidiOutput::new("XCTL-OSC-Output").context("Failed to create MIDI output")?;
        debug!("Found {} MIDI output ports", midi_out.port_count());

        let (out_port, out_name) = select_port(&midi_out, &self.output_port_name)
            .ok_or_else(|| anyhow!("No available MIDI output ports found"))?;

        info!("Connecting to output port: {}", out_name);

        let output_conn = midi_out
            .connect(&out_port, "XCTL-OSC")
            .map_err(|e| anyhow!("Failed to connect to output port '{}': {}", out_name, e))?;

        let output = Arc::new(XTouchOutput {
            conn: Mutex::new(Some(output_conn)),
            port_name: out_name,
        });

        self.input_conn = Some(input_conn);
        self.output = Some(output.clone());

        info!("X-Touch connected successfully");
        Ok(output)
    }

    /// Disconnect from MIDI ports
    pub fn disconnect(&mut self) {
        let was_connected = self.is_connected();
        if let Some(conn) = self.input_conn.take() {
            conn.close();
        }
        if let Some(output) = self.output.take() {
            output.close();
        }
        if was_connected {
            info!("X-Touch disconnected");
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.input_conn.is_some() && self.output.is_some()
    }

    /// Take the event receiver (for router to consume)
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<XTouchEvent>> {
        self.event_rx.take()
    }
}

impl Drop for XTouchDriver {
    fn drop(&mut self) {
        self.disconnect();
    }
}
