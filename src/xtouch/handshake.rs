//! Keep-alive handshake
//!
//! The surface drops its session unless it sees this SysEx regularly.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::DeviceOutput;
use crate::midi::MidiMessage;

/// Payload between F0 and F7
pub const HANDSHAKE_PAYLOAD: [u8; 5] = [0x00, 0x20, 0x32, 0x58, 0x54];

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6);

pub fn handshake_message() -> MidiMessage {
    MidiMessage::SysEx {
        data: HANDSHAKE_PAYLOAD.to_vec(),
    }
}

/// Send the handshake every `interval` until `shutdown` flips to true.
///
/// The stop signal is checked between ticks. Send failures are logged and
/// the timer keeps running.
pub fn spawn_handshake(
    device: Arc<dyn DeviceOutput>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let message = handshake_message();

        info!("Handshake timer started ({:?})", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match device.send(&message).await {
                        Ok(()) => debug!("Handshake sent"),
                        Err(e) => warn!("Handshake send failed: {:#}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Handshake timer stopped");
    })
}
