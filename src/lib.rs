//! XCTL OSC - Behringer X-Touch to OSC bridge
//!
//! Translates X-Touch control events into OSC messages (and back) through a
//! hot-swappable set of mapping layers. Layers can be switched from the
//! surface itself with a two-button chord gesture.

pub mod api;
pub mod config;
pub mod context;
pub mod events;
pub mod mapping;
pub mod midi;
pub mod osc;
pub mod paths;
pub mod remap;
pub mod router;
pub mod xtouch;

pub use context::BridgeContext;
pub use router::Router;
