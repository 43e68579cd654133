//! Virtual adapter lifecycle and packet pump
//!
//! The TUN device is owned by a dedicated task that bridges raw IP packets
//! to the session engines over bounded channels: reads from the device flow
//! into `inbound_tx`, packets received from the tunnel arrive on
//! `outbound_rx` and are written to the device. Device reads and writes
//! therefore never block the UDP workers.

use std::net::Ipv4Addr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::ifcfg;

const CHANNEL_CAPACITY: usize = 1000;

/// Scratch buffer for device reads, one full IP datagram
const READ_BUFFER_SIZE: usize = 65535;

#[derive(Debug, Clone)]
pub struct TunConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub mtu: u16,
}

struct Device {
    cfg: TunConfig,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    stop: CancellationToken,
}

impl Device {
    /// Creates the TUN device and configures it through the host OS
    fn open(&self) -> crate::Result<tun::AsyncDevice> {
        let mut config = tun::Configuration::default();
        config.tun_name(&self.cfg.name);

        #[cfg(target_os = "linux")]
        config.platform_config(|config| {
            config.ensure_root_privileges(true);
        });

        let dev = tun::create_as_async(&config)
            .map_err(|e| format!("failed to create tun device {}: {}", self.cfg.name, e))?;

        // dropping `dev` on any failure below closes the half-configured device
        ifcfg::set_mtu(&self.cfg.name, self.cfg.mtu)?;
        ifcfg::set_ip(&self.cfg.name, self.cfg.ip, self.cfg.netmask)?;
        ifcfg::up(&self.cfg.name)?;

        Ok(dev)
    }

    async fn run(&mut self, ready: oneshot::Sender<crate::Result<()>>) {
        let mut dev = match self.open() {
            Ok(dev) => {
                let _ = ready.send(Ok(()));
                dev
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => break,

                amount = dev.read(&mut buf) => {
                    let amount = match amount {
                        Ok(amount) => amount,
                        Err(e) => {
                            tracing::error!("read device fail: {:?}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.inbound_tx.send(buf[..amount].to_vec()).await {
                        tracing::error!("device => engine fail: {}", e);
                    }
                }

                packet = self.outbound_rx.recv() => {
                    let Some(packet) = packet else { break };
                    tracing::debug!("engine => device {} bytes", packet.len());
                    if let Err(e) = dev.write(&packet).await {
                        tracing::error!("write device fail: {:?}", e);
                    }
                }
            }
        }

        if let Err(e) = ifcfg::down(&self.cfg.name) {
            tracing::warn!("failed to bring {} down: {}", self.cfg.name, e);
        }
        // dropping the device closes it
    }
}

/// Handle to a running virtual adapter task
pub struct DeviceHandler {
    name: String,
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    outbound_tx: mpsc::Sender<Vec<u8>>,
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceHandler {
    /// Creates, configures, and brings up the adapter
    ///
    /// Returns once the device task has finished OS setup, so creation
    /// failures surface here rather than in a detached task.
    pub async fn spawn(cfg: TunConfig) -> crate::Result<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let name = cfg.name.clone();

        let mut device = Device {
            cfg,
            inbound_tx,
            outbound_rx,
            stop: stop.clone(),
        };

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            device.run(ready_tx).await;
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = task.await;
                return Err(e);
            }
            Err(_) => return Err("device task exited during setup".into()),
        }

        tracing::info!("tun device {} is up", name);
        Ok(Self {
            name,
            inbound_rx: Some(inbound_rx),
            outbound_tx,
            stop,
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the channel halves the session engine workers read and write
    ///
    /// The receiver yields packets read from the device; the sender queues
    /// packets to be written to it. Can only be taken once.
    pub fn split(&mut self) -> crate::Result<(mpsc::Receiver<Vec<u8>>, mpsc::Sender<Vec<u8>>)> {
        let inbound_rx = self.inbound_rx.take().ok_or("device reader already taken")?;
        Ok((inbound_rx, self.outbound_tx.clone()))
    }

    /// Brings the interface down and closes it
    pub async fn shutdown(self) {
        self.stop.cancel();
        let _ = self.task.await;
        tracing::info!("tun device {} closed", self.name);
    }
}
