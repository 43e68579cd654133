//! Server data-plane workers
//!
//! Three long-lived tasks share the UDP socket, the AEAD context, and the
//! session table:
//!
//! - the UDP reader demultiplexes inbound datagrams, upserts sessions, and
//!   hands DATA payloads to the virtual adapter
//! - the fan-out worker forwards every packet read from the adapter to all
//!   live sessions, each wrapped with that session's own id
//! - the reaper periodically deletes idle sessions
//!
//! All of them stop when the engine's cancellation token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{MAX_DATAGRAM, Packet, PacketType};
use crate::crypto::TunnelCipher;
use crate::server::session::SessionTable;

#[derive(Clone)]
pub struct Engine {
    socket: Arc<UdpSocket>,
    cipher: Arc<TunnelCipher>,
    sessions: Arc<SessionTable>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        socket: Arc<UdpSocket>,
        cipher: Arc<TunnelCipher>,
        sessions: Arc<SessionTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            socket,
            cipher,
            sessions,
            cancel,
        }
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        self.sessions.clone()
    }

    /// Spawns the UDP demux worker
    ///
    /// Malformed, unauthenticated, or undecodable datagrams are logged with
    /// their source endpoint and dropped; the worker never stops for them.
    pub fn spawn_udp_reader(&self, va_tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,

                    result = engine.socket.recv_from(&mut buf) => {
                        match result {
                            Ok((amount, remote)) => {
                                engine.handle_datagram(&buf[..amount], remote, &va_tx).await;
                            }
                            Err(e) => {
                                tracing::error!("error reading from udp: {}", e);
                            }
                        }
                    }
                }
            }
        })
    }

    async fn handle_datagram(&self, datagram: &[u8], remote: SocketAddr, va_tx: &mpsc::Sender<Vec<u8>>) {
        let plaintext = match self.cipher.open(datagram) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!("failed to decrypt datagram from {}: {}", remote, e);
                return;
            }
        };

        let packet = match Packet::decode(&plaintext) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!("failed to decode frame from {}: {}", remote, e);
                return;
            }
        };

        // both DATA and KEEPALIVE register and refresh the session
        if self.sessions.upsert(packet.session_id, remote) {
            tracing::info!("new client connected: {} (session: {})", remote, packet.session_id);
        }

        if packet.kind == PacketType::Data {
            if let Err(e) = va_tx.send(packet.payload).await {
                tracing::error!("engine => device fail: {}", e);
            }
        }
    }

    /// Spawns the fan-out worker
    ///
    /// Every packet read from the virtual adapter is broadcast to all live
    /// sessions; there is no inner-destination routing. The frame sent to a
    /// client carries that client's own session id, not the id of whoever
    /// originated the packet.
    pub fn spawn_fanout(&self, mut va_rx: mpsc::Receiver<Vec<u8>>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,

                    packet = va_rx.recv() => {
                        let Some(packet) = packet else { break };
                        // copy out the table under the read lock, then send
                        // without holding it
                        for (session_id, remote) in engine.sessions.snapshot() {
                            engine.send_to_client(session_id, remote, packet.clone()).await;
                        }
                    }
                }
            }
        })
    }

    async fn send_to_client(&self, session_id: u32, remote: SocketAddr, payload: Vec<u8>) {
        let encoded = match Packet::data(session_id, payload).encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!("failed to encode frame for {}: {}", remote, e);
                return;
            }
        };

        let datagram = match self.cipher.seal(&encoded) {
            Ok(datagram) => datagram,
            Err(e) => {
                tracing::error!("failed to encrypt frame for {}: {}", remote, e);
                return;
            }
        };

        if let Err(e) = self.socket.send_to(&datagram, remote).await {
            tracing::error!("error sending to client {}: {}", remote, e);
        }
    }

    /// Spawns the session reaper, ticking every `period`
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = engine.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        engine.sessions.reap();
                    }
                }
            }
        })
    }
}
