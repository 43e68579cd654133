use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::client::engine::KEEPALIVE_INTERVAL;

/// Resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. vpn.example.com:51820
    pub server_addr: String,
    pub password: String,
    pub tun_name: String,
    pub tun_ip: Ipv4Addr,
    pub tun_netmask: Ipv4Addr,
    pub mtu: u16,
    /// Networks to route through the tunnel; empty means full tunnel
    pub split_tunnel: Vec<IpNet>,
    pub keepalive_interval: Duration,
}

/// Client configuration file (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub server: String,

    pub password: String,

    #[serde(default = "default_tun_name")]
    pub tun: String,

    #[serde(default = "default_tun_ip")]
    pub tun_ip: String,

    #[serde(default = "default_tun_netmask")]
    pub tun_netmask: String,

    #[serde(default = "default_mtu")]
    pub mtu: u16,

    /// CIDR networks for split tunneling, empty for full tunnel
    #[serde(default)]
    pub split_tunnel: Vec<String>,

    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_secs: u64,
}

fn default_tun_name() -> String {
    "omail0".to_string()
}

fn default_tun_ip() -> String {
    "10.0.0.2".to_string()
}

fn default_tun_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_mtu() -> u16 {
    1500
}

fn default_keepalive_interval() -> u64 {
    KEEPALIVE_INTERVAL.as_secs()
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<FileConfig> {
    let content = fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}

impl FileConfig {
    pub fn into_config(self) -> crate::Result<ClientConfig> {
        let tun_ip: Ipv4Addr = self
            .tun_ip
            .parse()
            .map_err(|_| format!("invalid tun ip: {}", self.tun_ip))?;
        let tun_netmask: Ipv4Addr = self
            .tun_netmask
            .parse()
            .map_err(|_| format!("invalid tun netmask: {}", self.tun_netmask))?;

        let mut split_tunnel = Vec::with_capacity(self.split_tunnel.len());
        for network in &self.split_tunnel {
            let network: IpNet = network
                .trim()
                .parse()
                .map_err(|_| format!("invalid CIDR network: {}", network))?;
            split_tunnel.push(network);
        }

        Ok(ClientConfig {
            server_addr: self.server,
            password: self.password,
            tun_name: self.tun,
            tun_ip,
            tun_netmask,
            mtu: self.mtu,
            split_tunnel,
            keepalive_interval: Duration::from_secs(self.keepalive_interval_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: FileConfig = toml::from_str(
            r#"
server = "vpn.example.com:51820"
password = "secret"
"#,
        )
        .unwrap();
        let config = config.into_config().unwrap();

        assert_eq!(config.server_addr, "vpn.example.com:51820");
        assert_eq!(config.tun_name, "omail0");
        assert_eq!(config.tun_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(config.mtu, 1500);
        assert!(config.split_tunnel.is_empty());
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
    }

    #[test]
    fn split_tunnel_networks_parsed() {
        let config: FileConfig = toml::from_str(
            r#"
server = "vpn.example.com:51820"
password = "secret"
split_tunnel = ["10.10.0.0/16", "192.168.50.0/24"]
"#,
        )
        .unwrap();
        let config = config.into_config().unwrap();

        assert_eq!(
            config.split_tunnel,
            vec![
                "10.10.0.0/16".parse::<IpNet>().unwrap(),
                "192.168.50.0/24".parse::<IpNet>().unwrap()
            ]
        );
    }

    #[test]
    fn invalid_cidr_rejected() {
        let config: FileConfig = toml::from_str(
            r#"
server = "vpn.example.com:51820"
password = "secret"
split_tunnel = ["10.10.0.0/99"]
"#,
        )
        .unwrap();
        assert!(config.into_config().is_err());
    }
}
