//! Events published to observers and the queue that carries them
//!
//! Producers (device listener, network listener, reload watcher) call
//! `BroadcastSink::publish`, which never blocks. `EventBus` hands events to a
//! single consumer task over a bounded channel; that task owns the fan-out to
//! WebSocket observers.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::osc::NetworkMessage;

/// Default capacity of the producer queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Event envelope published to observers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A routed control changed value
    UiUpdate {
        event: String,
        channel: u8,
        value: Value,
    },
    /// The active layer changed or was reloaded
    LayerChange {
        active_layer: String,
        layer_names: Vec<String>,
        mapping_keys: Vec<String>,
    },
    /// Unmapped device message, passed through untouched
    Midi { raw: Vec<u8> },
    /// Unmapped network message, passed through untouched
    Network { raw: NetworkMessage },
    /// Network output target changed
    SettingsUpdated {
        osc_output_ip: String,
        osc_output_port: u16,
    },
    Error { message: String },
}

/// Anything that can accept published events without blocking the caller
pub trait BroadcastSink: Send + Sync {
    fn publish(&self, event: BridgeEvent);
}

/// Bounded, fire-and-forget event queue with a single consumer task
#[derive(Clone)]
pub struct EventBus {
    tx: mpsc::Sender<BridgeEvent>,
}

impl EventBus {
    /// Spawn the consumer task.
    ///
    /// Returns the producer handle, the broadcast sender observers subscribe
    /// to, and the consumer's join handle. The consumer exits once every
    /// producer handle is dropped.
    pub fn spawn(capacity: usize) -> (Self, broadcast::Sender<BridgeEvent>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<BridgeEvent>(capacity);
        let (observers, _) = broadcast::channel::<BridgeEvent>(capacity);
        let fanout = observers.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                trace!("Event: {:?}", event);
                // No subscribers is not an error
                let _ = fanout.send(event);
            }
            debug!("Event bus consumer stopped");
        });

        (Self { tx }, observers, handle)
    }
}

impl BroadcastSink for EventBus {
    fn publish(&self, event: BridgeEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(dropped) => {
                    warn!("Event queue full, dropping {:?}", dropped);
                }
                mpsc::error::TrySendError::Closed(_) => {
                    debug!("Event queue closed");
                }
            }
        }
    }
}
