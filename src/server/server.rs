//! Server lifecycle
//!
//! Owns the virtual adapter, the UDP listening socket, and the engine
//! workers. `start` performs OS setup (fatal on failure, unwinding anything
//! already created); `stop` cancels the workers and tears resources down in
//! order: socket, adapter, then join.

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::crypto::TunnelCipher;
use crate::server::config::ServerConfig;
use crate::server::engine::Engine;
use crate::server::session::SessionTable;
use crate::utils::device::{DeviceHandler, TunConfig};

pub struct Server {
    cfg: ServerConfig,
    cipher: Arc<TunnelCipher>,
    sessions: Arc<SessionTable>,
    cancel: CancellationToken,
    socket: Option<Arc<UdpSocket>>,
    dev: Option<DeviceHandler>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Self {
        let cipher = Arc::new(TunnelCipher::from_password(&cfg.password));
        let sessions = Arc::new(SessionTable::new(cfg.idle_ttl));
        Self {
            cfg,
            cipher,
            sessions,
            cancel: CancellationToken::new(),
            socket: None,
            dev: None,
            workers: Vec::new(),
        }
    }

    pub fn sessions(&self) -> Arc<SessionTable> {
        self.sessions.clone()
    }

    /// Brings up the adapter, binds the UDP socket, and spawns the workers
    pub async fn start(&mut self) -> crate::Result<()> {
        let mut dev = DeviceHandler::spawn(TunConfig {
            name: self.cfg.tun_name.clone(),
            ip: self.cfg.tun_ip,
            netmask: self.cfg.tun_netmask,
            mtu: self.cfg.mtu,
        })
        .await?;

        let socket = match UdpSocket::bind(&self.cfg.listen_addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                dev.shutdown().await;
                return Err(format!("failed to bind {}: {}", self.cfg.listen_addr, e).into());
            }
        };

        let (va_rx, va_tx) = match dev.split() {
            Ok(halves) => halves,
            Err(e) => {
                dev.shutdown().await;
                return Err(e);
            }
        };

        tracing::info!("vpn server listening on {}", self.cfg.listen_addr);

        let engine = Engine::new(
            socket.clone(),
            self.cipher.clone(),
            self.sessions.clone(),
            self.cancel.clone(),
        );
        self.workers.push(engine.spawn_udp_reader(va_tx));
        self.workers.push(engine.spawn_fanout(va_rx));
        self.workers.push(engine.spawn_reaper(self.cfg.reaper_interval));

        self.socket = Some(socket);
        self.dev = Some(dev);
        Ok(())
    }

    /// Stops the workers and releases the socket and adapter
    pub async fn stop(mut self) {
        self.cancel.cancel();

        drop(self.socket.take());

        if let Some(dev) = self.dev.take() {
            dev.shutdown().await;
        }

        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }

        tracing::info!("server stopped");
    }
}
