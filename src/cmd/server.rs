use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use omail::server::session::{IDLE_TTL, REAPER_INTERVAL};
use omail::server::{Server, ServerConfig, config};

/// omail VPN server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP listen address
    #[arg(long, default_value = "0.0.0.0:51820")]
    address: String,

    /// Shared tunnel password
    #[arg(long, required_unless_present = "config")]
    password: Option<String>,

    /// TUN interface name
    #[arg(long, default_value = "omail0")]
    tun: String,

    /// TUN interface IP address
    #[arg(long, default_value = "10.0.0.1")]
    tun_ip: Ipv4Addr,

    /// TUN interface netmask
    #[arg(long, default_value = "255.255.255.0")]
    tun_netmask: Ipv4Addr,

    /// MTU size
    #[arg(long, default_value_t = 1500)]
    mtu: u16,

    /// TOML configuration file, used instead of the flags above
    #[arg(long, conflicts_with = "password")]
    config: Option<PathBuf>,
}

fn build_config(args: Args) -> omail::Result<ServerConfig> {
    if let Some(path) = args.config {
        let file = config::load(&path)
            .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        return file.into_config();
    }

    let Some(password) = args.password else {
        return Err("password is required".into());
    };

    Ok(ServerConfig {
        listen_addr: args.address,
        password,
        tun_name: args.tun,
        tun_ip: args.tun_ip,
        tun_netmask: args.tun_netmask,
        mtu: args.mtu,
        idle_ttl: IDLE_TTL,
        reaper_interval: REAPER_INTERVAL,
    })
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() {
    if let Err(e) = omail::utils::init_tracing() {
        eprintln!("failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    let args = Args::parse();
    let cfg = match build_config(args) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let mut server = Server::new(cfg);
    if let Err(e) = server.start().await {
        tracing::error!("failed to start server: {}", e);
        std::process::exit(1);
    }

    wait_for_signal().await;

    tracing::info!("shutting down server...");
    server.stop().await;
}
