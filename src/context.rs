//! Collaborators shared by the router and its callers

use std::sync::Arc;

use crate::events::{BridgeEvent, BroadcastSink};
use crate::mapping::MappingStore;
use crate::osc::NetworkOutput;
use crate::router::GestureNotes;
use crate::xtouch::DeviceOutput;

/// Everything the router talks to, built once at startup
#[derive(Clone)]
pub struct BridgeContext {
    pub store: Arc<MappingStore>,
    pub device: Arc<dyn DeviceOutput>,
    pub network: Arc<dyn NetworkOutput>,
    pub events: Arc<dyn BroadcastSink>,
    pub gesture: GestureNotes,
}

impl BridgeContext {
    pub fn new(
        store: Arc<MappingStore>,
        device: Arc<dyn DeviceOutput>,
        network: Arc<dyn NetworkOutput>,
        events: Arc<dyn BroadcastSink>,
    ) -> Self {
        Self {
            store,
            device,
            network,
            events,
            gesture: GestureNotes::default(),
        }
    }

    pub fn with_gesture(mut self, gesture: GestureNotes) -> Self {
        self.gesture = gesture;
        self
    }

    pub fn publish(&self, event: BridgeEvent) {
        self.events.publish(event);
    }
}
