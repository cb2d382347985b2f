//! OSC UDP client with reconnect-on-failure
//!
//! The socket handle lives behind a single mutex: concurrent senders are
//! serialized, and a reconnect replaces the handle while holding the same lock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{NetworkMessage, NetworkOutput};

/// Delay before recreating the socket after a failed send
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

struct ClientState {
    socket: Option<UdpSocket>,
    target_host: String,
    target_port: u16,
}

/// Thread-safe OSC sender
pub struct OscClient {
    state: Mutex<ClientState>,
    backoff: Duration,
}

impl OscClient {
    /// Create a client for `host:port`. The socket is opened lazily on first send.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_backoff(host, port, RECONNECT_BACKOFF)
    }

    /// Create a client with a custom reconnect backoff
    pub fn with_backoff(host: impl Into<String>, port: u16, backoff: Duration) -> Self {
        Self {
            state: Mutex::new(ClientState {
                socket: None,
                target_host: host.into(),
                target_port: port,
            }),
            backoff,
        }
    }

    /// Current output target as `(host, port)`
    pub async fn target(&self) -> (String, u16) {
        let state = self.state.lock().await;
        (state.target_host.clone(), state.target_port)
    }

    /// Point the client at a new target. Returns true if the target changed.
    pub async fn retarget(&self, host: &str, port: u16) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.target_host == host && state.target_port == port {
            return Ok(false);
        }

        state.target_host = host.to_string();
        state.target_port = port;
        state.socket = None;
        Self::initialize(&mut state).await?;
        Ok(true)
    }

    async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
        tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("Failed to resolve OSC target {}:{}", host, port))?
            .next()
            .ok_or_else(|| anyhow!("OSC target {}:{} resolved to no address", host, port))
    }

    async fn initialize(state: &mut ClientState) -> Result<()> {
        info!(
            "Initializing OSC client to {}:{}",
            state.target_host, state.target_port
        );
        let target = Self::resolve(&state.target_host, state.target_port).await?;
        let bind_addr: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("Failed to bind OSC client socket")?;
        socket
            .connect(target)
            .await
            .with_context(|| format!("Failed to connect OSC client to {}", target))?;
        state.socket = Some(socket);
        info!("OSC client connected to {}", target);
        Ok(())
    }

    async fn try_send(state: &mut ClientState, bytes: &[u8]) -> Result<()> {
        if state.socket.is_none() {
            Self::initialize(state).await?;
        }
        let socket = state
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("OSC client socket unavailable"))?;
        socket.send(bytes).await.context("OSC send failed")?;
        Ok(())
    }

    /// Close the socket; the next send reopens it
    pub async fn close(&self) {
        self.state.lock().await.socket = None;
        debug!("OSC client closed");
    }
}

#[async_trait]
impl NetworkOutput for OscClient {
    async fn send(&self, message: &NetworkMessage) -> Result<()> {
        let bytes = message.encode().context("Failed to encode OSC message")?;

        let mut state = self.state.lock().await;
        match Self::try_send(&mut state, &bytes).await {
            Ok(()) => {
                debug!(
                    "Sent OSC: {} to {}:{}",
                    message, state.target_host, state.target_port
                );
                Ok(())
            }
            Err(e) => {
                error!("Message send failed: {:#}", e);
                warn!("Attempting OSC recovery in {:?}...", self.backoff);
                state.socket = None;
                tokio::time::sleep(self.backoff).await;

                match Self::try_send(&mut state, &bytes).await {
                    Ok(()) => {
                        info!("OSC send recovered: {}", message);
                        Ok(())
                    }
                    Err(e) => {
                        error!("OSC recovery failed: {:#}", e);
                        state.socket = None;
                        Err(e)
                    }
                }
            }
        }
    }
}
