//! Host routing table management
//!
//! Steers host traffic into the tunnel interface. Full tunnel installs a
//! default route through the interface; split tunnel installs one route per
//! configured CIDR. Cleanup enumerates the host routing table and removes
//! every route whose egress interface is the tunnel device.
//!
//! Linux shells out to `ip route`; macOS to `route` and `netstat -rn`.

use ipnet::IpNet;
use std::net::IpAddr;
#[allow(unused_imports)]
use std::process::Command;

/// One parsed host routing table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub destination: IpNet,
    pub gateway: Option<IpAddr>,
    pub interface: String,
}

/// Installs and removes routes bound to one tunnel interface
pub struct RouteManager {
    interface: String,
}

impl RouteManager {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    /// Routes all host traffic through the tunnel
    pub fn setup_default(&self) -> crate::Result<()> {
        self.add("0.0.0.0/0")
    }

    /// Routes only the listed networks through the tunnel
    pub fn setup_split(&self, networks: &[IpNet]) -> crate::Result<()> {
        for network in networks {
            self.add_route(network)
                .map_err(|e| format!("failed to add route for {}: {}", network, e))?;
        }
        Ok(())
    }

    pub fn add_route(&self, destination: &IpNet) -> crate::Result<()> {
        self.add(&destination.to_string())
    }

    pub fn delete_route(&self, destination: &IpNet) -> crate::Result<()> {
        self.delete(&destination.to_string())
    }

    /// Removes every route whose egress interface is the tunnel device
    ///
    /// Deletion failures are logged and skipped: a stale route that cannot
    /// be removed must not block removal of the remaining ones.
    pub fn cleanup(&self) -> crate::Result<()> {
        let routes = self.list_routes()?;
        for route in routes.iter().filter(|r| r.interface == self.interface) {
            if let Err(e) = self.delete_route(&route.destination) {
                tracing::warn!("failed to delete route {}: {}", route.destination, e);
            }
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn add(&self, destination: &str) -> crate::Result<()> {
        let output = Command::new("ip")
            .args(["route", "add", destination, "dev", &self.interface])
            .output()
            .map_err(|e| format!("failed to execute ip command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // the route is already installed
            if stderr.contains("File exists") {
                tracing::debug!("route {} already exists", destination);
                return Ok(());
            }
            return Err(format!("failed to add route: {}", stderr.trim()).into());
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn delete(&self, destination: &str) -> crate::Result<()> {
        let output = Command::new("ip")
            .args(["route", "del", destination, "dev", &self.interface])
            .output()
            .map_err(|e| format!("failed to execute ip command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("failed to delete route: {}", stderr.trim()).into());
        }
        Ok(())
    }

    /// Lists the host routing table
    #[cfg(target_os = "linux")]
    pub fn list_routes(&self) -> crate::Result<Vec<Route>> {
        let output = Command::new("ip")
            .args(["route", "show"])
            .output()
            .map_err(|e| format!("failed to execute ip command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("failed to list routes: {}", stderr.trim()).into());
        }

        Ok(parse_ip_route(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(target_os = "macos")]
    fn add(&self, destination: &str) -> crate::Result<()> {
        let output = Command::new("route")
            .args(["add", "-net", destination, "-interface", &self.interface])
            .output()
            .map_err(|e| format!("failed to execute route command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("File exists") {
                tracing::debug!("route {} already exists", destination);
                return Ok(());
            }
            return Err(format!("failed to add route: {}", stderr.trim()).into());
        }
        Ok(())
    }

    #[cfg(target_os = "macos")]
    fn delete(&self, destination: &str) -> crate::Result<()> {
        let output = Command::new("route")
            .args(["delete", "-net", destination, "-interface", &self.interface])
            .output()
            .map_err(|e| format!("failed to execute route command: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("failed to delete route: {}", stderr.trim()).into());
        }
        Ok(())
    }

    /// Lists the host routing table
    #[cfg(target_os = "macos")]
    pub fn list_routes(&self) -> crate::Result<Vec<Route>> {
        let output = Command::new("netstat")
            .args(["-rn"])
            .output()
            .map_err(|e| format!("failed to execute netstat: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("failed to list routes: {}", stderr.trim()).into());
        }

        Ok(parse_netstat(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn add(&self, _destination: &str) -> crate::Result<()> {
        Err("route management is not supported on this platform".into())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    fn delete(&self, _destination: &str) -> crate::Result<()> {
        Err("route management is not supported on this platform".into())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    pub fn list_routes(&self) -> crate::Result<Vec<Route>> {
        Err("route management is not supported on this platform".into())
    }
}

/// Parses a destination column value into a network
///
/// Handles `default`, plain CIDRs, bare addresses (host routes), and the
/// BSD habit of truncating trailing zero octets (`10.0.0/24`, `127`).
#[allow(dead_code)]
fn parse_destination(dest: &str) -> Option<IpNet> {
    if dest == "default" {
        return "0.0.0.0/0".parse().ok();
    }

    let (addr, prefix) = match dest.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
        None => (dest, None),
    };

    if addr.contains(':') {
        // IPv6 destination, only full addresses are handled
        let net = format!("{}/{}", addr, prefix.unwrap_or(128));
        return net.parse().ok();
    }

    let mut octets: Vec<&str> = addr.split('.').collect();
    if octets.len() > 4 || octets.iter().any(|o| o.parse::<u8>().is_err()) {
        return None;
    }
    // classful truncation: "127" is 127.0.0.0/8, "10.0.0" is 10.0.0.0/24
    let implied_prefix = 8 * octets.len() as u8;
    while octets.len() < 4 {
        octets.push("0");
    }

    let prefix = prefix.unwrap_or(implied_prefix);
    format!("{}/{}", octets.join("."), prefix).parse().ok()
}

/// Parses `ip route show` output
#[allow(dead_code)]
fn parse_ip_route(output: &str) -> Vec<Route> {
    let mut routes = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }

        let destination = match parse_destination(fields[0]) {
            Some(dest) => dest,
            None => continue,
        };

        let mut gateway = None;
        let mut interface = String::new();
        for pair in fields.windows(2) {
            match pair[0] {
                "via" => gateway = pair[1].parse().ok(),
                "dev" => interface = pair[1].to_string(),
                _ => {}
            }
        }

        routes.push(Route {
            destination,
            gateway,
            interface,
        });
    }

    routes
}

/// Parses `netstat -rn` output, keeping only usable (`U` flag) entries
#[allow(dead_code)]
fn parse_netstat(output: &str) -> Vec<Route> {
    let mut routes = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }

        let (dest, gateway, flags, interface) = (fields[0], fields[1], fields[2], fields[3]);
        if !flags.contains('U') {
            continue;
        }

        let destination = match parse_destination(dest) {
            Some(dest) => dest,
            None => continue,
        };

        routes.push(Route {
            destination,
            gateway: gateway.parse().ok(),
            interface: interface.to_string(),
        });
    }

    routes
}
