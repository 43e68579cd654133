//! Client lifecycle
//!
//! `connect` performs the boot sequence: bring up the virtual adapter,
//! connect the UDP socket, register the session with a first keep-alive,
//! install routing, and spawn the data-plane workers. `disconnect` tears
//! everything down in order: cancel workers, close the socket, remove the
//! routes, close the adapter, join.

use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::config::ClientConfig;
use crate::client::engine::Engine;
use crate::crypto::TunnelCipher;
use crate::utils::device::{DeviceHandler, TunConfig};
use crate::utils::sys_route::RouteManager;

pub struct Client {
    cfg: ClientConfig,
    cipher: Arc<TunnelCipher>,
    session_id: u32,
    routes: RouteManager,
    cancel: CancellationToken,
    socket: Option<Arc<UdpSocket>>,
    dev: Option<DeviceHandler>,
    workers: Vec<JoinHandle<()>>,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Self {
        let cipher = Arc::new(TunnelCipher::from_password(&cfg.password));
        let routes = RouteManager::new(cfg.tun_name.clone());
        Self {
            cfg,
            cipher,
            session_id: rand::random::<u32>(),
            routes,
            cancel: CancellationToken::new(),
            socket: None,
            dev: None,
            workers: Vec::new(),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    /// Establishes the tunnel
    pub async fn connect(&mut self) -> crate::Result<()> {
        tracing::info!("connecting to vpn server at {}", self.cfg.server_addr);

        let mut dev = DeviceHandler::spawn(TunConfig {
            name: self.cfg.tun_name.clone(),
            ip: self.cfg.tun_ip,
            netmask: self.cfg.tun_netmask,
            mtu: self.cfg.mtu,
        })
        .await?;

        // connect() resolves the server address and pins the flow to it
        let socket = match self.dial().await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                dev.shutdown().await;
                return Err(e);
            }
        };

        let engine = Engine::new(
            socket.clone(),
            self.cipher.clone(),
            self.session_id,
            self.cancel.clone(),
        );

        // the first keep-alive registers the session with the server
        if let Err(e) = engine.send_keepalive().await {
            dev.shutdown().await;
            return Err(format!("failed to establish session: {}", e).into());
        }

        // routes go in only after the session exists; a broken routing
        // setup degrades the tunnel but does not abort it
        if let Err(e) = self.setup_routing() {
            tracing::warn!("failed to setup routing: {}", e);
        }

        let (va_rx, va_tx) = match dev.split() {
            Ok(halves) => halves,
            Err(e) => {
                dev.shutdown().await;
                return Err(e);
            }
        };

        self.workers.push(engine.spawn_va_to_udp(va_rx));
        self.workers.push(engine.spawn_udp_to_va(va_tx));
        self.workers.push(engine.spawn_keepalive(self.cfg.keepalive_interval));

        self.socket = Some(socket);
        self.dev = Some(dev);

        tracing::info!(
            "connected to vpn server (session {:#010x})",
            self.session_id
        );
        Ok(())
    }

    async fn dial(&self) -> crate::Result<UdpSocket> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket
            .connect(&self.cfg.server_addr)
            .await
            .map_err(|e| format!("failed to dial server {}: {}", self.cfg.server_addr, e))?;
        Ok(socket)
    }

    fn setup_routing(&self) -> crate::Result<()> {
        if self.cfg.split_tunnel.is_empty() {
            tracing::info!("full tunnel: routing all traffic through {}", self.cfg.tun_name);
            self.routes.setup_default()
        } else {
            tracing::info!(
                "split tunnel: routing {} networks through {}",
                self.cfg.split_tunnel.len(),
                self.cfg.tun_name
            );
            self.routes.setup_split(&self.cfg.split_tunnel)
        }
    }

    /// Tears the tunnel down
    ///
    /// Routing cleanup runs unconditionally, even when connect only got
    /// partway.
    pub async fn disconnect(mut self) {
        self.cancel.cancel();

        drop(self.socket.take());

        if let Err(e) = self.routes.cleanup() {
            tracing::warn!("failed to cleanup routing: {}", e);
        }

        if let Some(dev) = self.dev.take() {
            dev.shutdown().await;
        }

        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }

        tracing::info!("disconnected from vpn server");
    }
}
