use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::server::session::{IDLE_TTL, REAPER_INTERVAL};

/// Resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// UDP listen address, e.g. 0.0.0.0:51820
    pub listen_addr: String,
    pub password: String,
    pub tun_name: String,
    pub tun_ip: Ipv4Addr,
    pub tun_netmask: Ipv4Addr,
    pub mtu: u16,
    /// Sessions idle longer than this are reaped
    pub idle_ttl: Duration,
    pub reaper_interval: Duration,
}

/// Server configuration file (TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_listen_addr")]
    pub address: String,

    pub password: String,

    #[serde(default = "default_tun_name")]
    pub tun: String,

    #[serde(default = "default_tun_ip")]
    pub tun_ip: String,

    #[serde(default = "default_tun_netmask")]
    pub tun_netmask: String,

    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

fn default_listen_addr() -> String {
    "0.0.0.0:51820".to_string()
}

fn default_tun_name() -> String {
    "omail0".to_string()
}

fn default_tun_ip() -> String {
    "10.0.0.1".to_string()
}

fn default_tun_netmask() -> String {
    "255.255.255.0".to_string()
}

fn default_mtu() -> u16 {
    1500
}

pub fn load(path: impl AsRef<Path>) -> anyhow::Result<FileConfig> {
    let content = fs::read_to_string(path)?;
    let config: FileConfig = toml::from_str(&content)?;
    Ok(config)
}

impl FileConfig {
    pub fn into_config(self) -> crate::Result<ServerConfig> {
        let tun_ip: Ipv4Addr = self
            .tun_ip
            .parse()
            .map_err(|_| format!("invalid tun ip: {}", self.tun_ip))?;
        let tun_netmask: Ipv4Addr = self
            .tun_netmask
            .parse()
            .map_err(|_| format!("invalid tun netmask: {}", self.tun_netmask))?;

        Ok(ServerConfig {
            listen_addr: self.address,
            password: self.password,
            tun_name: self.tun,
            tun_ip,
            tun_netmask,
            mtu: self.mtu,
            idle_ttl: IDLE_TTL,
            reaper_interval: REAPER_INTERVAL,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: FileConfig = toml::from_str(r#"password = "secret""#).unwrap();
        let config = config.into_config().unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:51820");
        assert_eq!(config.tun_name, "omail0");
        assert_eq!(config.tun_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(config.tun_netmask, Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(config.mtu, 1500);
        assert_eq!(config.idle_ttl, Duration::from_secs(60));
    }

    #[test]
    fn invalid_tun_ip_rejected() {
        let config: FileConfig = toml::from_str(
            r#"
password = "secret"
tun_ip = "not-an-ip"
"#,
        )
        .unwrap();
        assert!(config.into_config().is_err());
    }
}
