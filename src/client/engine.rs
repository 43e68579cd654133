//! Client data-plane workers
//!
//! The client runs three long-lived tasks against its connected UDP socket:
//!
//! - VA→UDP: wraps each packet read from the virtual adapter in a DATA
//!   frame with the client's session id, seals it, and sends it
//! - UDP→VA: opens and decodes inbound datagrams and writes DATA payloads
//!   to the adapter; anything else is dropped
//! - keep-alive: refreshes the server-side session on a fixed interval
//!
//! Steady-state errors are logged and the worker keeps running; only
//! cancellation stops a worker.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{MAX_DATAGRAM, Packet, PacketType};
use crate::crypto::TunnelCipher;

/// Keep-alive send period
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct Engine {
    socket: Arc<UdpSocket>,
    cipher: Arc<TunnelCipher>,
    session_id: u32,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        socket: Arc<UdpSocket>,
        cipher: Arc<TunnelCipher>,
        session_id: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            cipher,
            session_id,
            cancel,
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Sends one keep-alive frame to the server
    ///
    /// The first keep-alive doubles as session registration.
    pub async fn send_keepalive(&self) -> crate::Result<()> {
        let encoded = Packet::keepalive(self.session_id).encode()?;
        let datagram = self.cipher.seal(&encoded)?;
        self.socket.send(&datagram).await?;
        Ok(())
    }

    /// Spawns the VA→UDP worker
    pub fn spawn_va_to_udp(&self, mut va_rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,

                    packet = va_rx.recv() => {
                        let Some(packet) = packet else { break };
                        engine.send_to_server(packet).await;
                    }
                }
            }
        })
    }

    async fn send_to_server(&self, payload: Vec<u8>) {
        let encoded = match Packet::data(self.session_id, payload).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("failed to encode frame: {}", e);
                return;
            }
        };

        let datagram = match self.cipher.seal(&encoded) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::error!("failed to encrypt frame: {}", e);
                return;
            }
        };

        if let Err(e) = self.socket.send(&datagram).await {
            tracing::error!("error sending to server: {}", e);
        }
    }

    /// Spawns the UDP→VA worker
    ///
    /// Only DATA payloads reach the adapter; keep-alive echoes and unknown
    /// frames are dropped.
    pub fn spawn_udp_to_va(&self, va_tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,

                    result = engine.socket.recv(&mut buf) => {
                        match result {
                            Ok(amount) => engine.handle_datagram(&buf[..amount], &va_tx).await,
                            Err(e) => {
                                tracing::error!("error reading from udp: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    async fn handle_datagram(&self, datagram: &[u8], va_tx: &mpsc::Sender<Vec<u8>>) {
        let plaintext = match self.cipher.open(datagram) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("failed to decrypt datagram: {}", e);
                return;
            }
        };

        let packet = match Packet::decode(&plaintext) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("failed to decode frame: {}", e);
                return;
            }
        };

        if packet.kind == PacketType::Data {
            if let Err(e) = va_tx.send(packet.payload).await {
                tracing::error!("engine => device fail: {}", e);
            }
        }
    }

    /// Spawns the periodic keep-alive worker
    pub fn spawn_keepalive(&self, interval: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the registration keep-alive was already sent by connect
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,

                    _ = ticker.tick() => {
                        if let Err(e) = engine.send_keepalive().await {
                            tracing::error!("failed to send keepalive: {}", e);
                        }
                    }
                }
            }
        })
    }
}
