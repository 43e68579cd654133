use clap::Parser;
use ipnet::IpNet;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use omail::client::engine::KEEPALIVE_INTERVAL;
use omail::client::{Client, ClientConfig, config};

/// omail VPN client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address (e.g. vpn.example.com:51820)
    #[arg(long, required_unless_present = "config")]
    server: Option<String>,

    /// Shared tunnel password
    #[arg(long, required_unless_present = "config")]
    password: Option<String>,

    /// TUN interface name
    #[arg(long, default_value = "omail0")]
    tun: String,

    /// TUN interface IP address
    #[arg(long, default_value = "10.0.0.2")]
    tun_ip: Ipv4Addr,

    /// TUN interface netmask
    #[arg(long, default_value = "255.255.255.0")]
    tun_netmask: Ipv4Addr,

    /// MTU size
    #[arg(long, default_value_t = 1500)]
    mtu: u16,

    /// Comma-separated CIDR networks for split tunneling (empty for full tunnel)
    #[arg(long, value_delimiter = ',')]
    split_tunnel: Vec<IpNet>,

    /// TOML configuration file, used instead of the flags above
    #[arg(long, conflicts_with_all = ["server", "password"])]
    config: Option<PathBuf>,
}

fn build_config(args: Args) -> omail::Result<ClientConfig> {
    if let Some(path) = args.config {
        let file = config::load(&path)
            .map_err(|e| format!("failed to load {}: {}", path.display(), e))?;
        return file.into_config();
    }

    let Some(server_addr) = args.server else {
        return Err("server address is required".into());
    };
    let Some(password) = args.password else {
        return Err("password is required".into());
    };

    Ok(ClientConfig {
        server_addr,
        password,
        tun_name: args.tun,
        tun_ip: args.tun_ip,
        tun_netmask: args.tun_netmask,
        mtu: args.mtu,
        split_tunnel: args.split_tunnel,
        keepalive_interval: KEEPALIVE_INTERVAL,
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

    let mut client = Client::new(cfg);
    if let Err(e) = client.connect().await {
        tracing::error!("failed to connect: {}", e);
        std::process::exit(1);
    }

    wait_for_signal().await;

    tracing::info!("disconnecting from vpn server...");
    client.disconnect().await;
}
