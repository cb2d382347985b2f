//! OSC UDP receive loop

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};

use super::NetworkMessage;

const MAX_DATAGRAM: usize = 65_536;

/// Receives OSC packets and forwards decoded messages over a channel
pub struct OscServer {
    socket: UdpSocket,
    message_tx: mpsc::Sender<NetworkMessage>,
    message_rx: Option<mpsc::Receiver<NetworkMessage>>,
}

impl OscServer {
    /// Bind the input port. Failure here is a startup error.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((host, port))
            .await
            .with_context(|| format!("Failed to bind OSC input port {}:{}", host, port))?;
        let (message_tx, message_rx) = mpsc::channel(1000);

        info!("OSC Server started on {}", socket.local_addr()?);

        Ok(Self {
            socket,
            message_tx,
            message_rx: Some(message_rx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Take the decoded message receiver (for the router loop to consume)
    pub fn take_message_receiver(&mut self) -> Option<mpsc::Receiver<NetworkMessage>> {
        self.message_rx.take()
    }

    /// Run the receive loop until `shutdown` flips to true or the receiver is dropped
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];

            loop {
                tokio::select! {
                    result = self.socket.recv_from(&mut buf) => {
                        let (len, from) = match result {
                            Ok(received) => received,
                            Err(e) => {
                                error!("OSC receive failed: {}", e);
                                continue;
                            }
                        };

                        let messages = match NetworkMessage::decode(&buf[..len]) {
                            Ok(messages) => messages,
                            Err(e) => {
                                debug!("Dropping undecodable OSC packet from {}: {}", from, e);
                                continue;
                            }
                        };

                        for message in messages {
                            trace!("OSC ← {}: {}", from, message);
                            if self.message_tx.send(message).await.is_err() {
                                debug!("OSC message receiver dropped, stopping server");
                                return;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("OSC Server stopped");
        })
    }
}
