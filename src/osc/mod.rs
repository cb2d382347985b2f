//! OSC side of the bridge
//!
//! `NetworkMessage` is the transport-neutral translation unit; `client`
//! sends it over UDP, `server` receives and decodes inbound packets.

pub mod client;
pub mod server;

pub use client::OscClient;
pub use server::OscServer;

use anyhow::Result;
use async_trait::async_trait;
use rosc::{OscMessage, OscPacket, OscType};
use serde::Serialize;
use std::fmt;

/// A single OSC argument
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    Str(String),
    Bool(bool),
}

impl OscArg {
    /// Numeric view of the argument (booleans as 0/1)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            OscArg::Int(i) => Some(*i as f64),
            OscArg::Float(f) => Some(*f as f64),
            OscArg::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            OscArg::Str(_) => None,
        }
    }

    fn from_osc(arg: &OscType) -> Option<Self> {
        match arg {
            OscType::Int(i) => Some(OscArg::Int(*i)),
            OscType::Float(f) => Some(OscArg::Float(*f)),
            OscType::Double(d) => Some(OscArg::Float(*d as f32)),
            // Outside i32 the value is kept as a float rather than wrapped
            OscType::Long(l) => Some(match i32::try_from(*l) {
                Ok(i) => OscArg::Int(i),
                Err(_) => OscArg::Float(*l as f32),
            }),
            OscType::String(s) => Some(OscArg::Str(s.clone())),
            OscType::Bool(b) => Some(OscArg::Bool(*b)),
            _ => None,
        }
    }

    fn to_osc(&self) -> OscType {
        match self {
            OscArg::Int(i) => OscType::Int(*i),
            OscArg::Float(f) => OscType::Float(*f),
            OscArg::Str(s) => OscType::String(s.clone()),
            OscArg::Bool(b) => OscType::Bool(*b),
        }
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OscArg::Int(i) => write!(f, "{}", i),
            OscArg::Float(v) => write!(f, "{:.4}", v),
            OscArg::Str(s) => write!(f, "\"{}\"", s),
            OscArg::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// An addressed OSC message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl NetworkMessage {
    pub fn new(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// First argument as a number, if any
    pub fn first_number(&self) -> Option<f64> {
        self.args.first().and_then(OscArg::as_f64)
    }

    /// Encode into an OSC packet
    pub fn encode(&self) -> Result<Vec<u8>> {
        let packet = OscPacket::Message(OscMessage {
            addr: self.address.clone(),
            args: self.args.iter().map(OscArg::to_osc).collect(),
        });
        Ok(rosc::encoder::encode(&packet)?)
    }

    /// Decode a UDP datagram; bundles are flattened into their messages
    pub fn decode(datagram: &[u8]) -> Result<Vec<Self>> {
        let (_, packet) = rosc::decoder::decode_udp(datagram)?;
        let mut out = Vec::new();
        flatten(packet, &mut out);
        Ok(out)
    }
}

fn flatten(packet: OscPacket, out: &mut Vec<NetworkMessage>) {
    match packet {
        OscPacket::Message(msg) => out.push(NetworkMessage {
            address: msg.addr,
            args: msg.args.iter().filter_map(OscArg::from_osc).collect(),
        }),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, out);
            }
        }
    }
}

impl fmt::Display for NetworkMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outbound side of the network protocol
#[async_trait]
pub trait NetworkOutput: Send + Sync {
    async fn send(&self, message: &NetworkMessage) -> Result<()>;
}
