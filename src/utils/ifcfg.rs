//! Interface address, MTU, and flag configuration
//!
//! The tunnel device is configured through the host OS rather than through
//! the TUN file descriptor. On Linux this is done with ioctls on a throwaway
//! AF_INET datagram socket (SIOCSIFADDR, SIOCSIFNETMASK, SIOCSIFMTU,
//! SIOCGIFFLAGS/SIOCSIFFLAGS); on macOS by shelling out to `ifconfig`.
//! Other platforms are not supported.

use std::net::Ipv4Addr;

/// Assigns the interface address and netmask
pub fn set_ip(name: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> crate::Result<()> {
    imp::set_ip(name, ip, netmask)
}

/// Sets the interface MTU
pub fn set_mtu(name: &str, mtu: u16) -> crate::Result<()> {
    imp::set_mtu(name, mtu)
}

/// Marks the interface up and running
pub fn up(name: &str) -> crate::Result<()> {
    imp::up(name)
}

/// Clears the interface up flag
pub fn down(name: &str) -> crate::Result<()> {
    imp::down(name)
}

#[cfg(target_os = "linux")]
mod imp {
    use std::io;
    use std::net::Ipv4Addr;

    /// Control socket for interface ioctls, closed on drop
    struct CtlSocket(libc::c_int);

    impl CtlSocket {
        fn open() -> io::Result<Self> {
            let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
            if fd < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(CtlSocket(fd))
        }

        fn ioctl(&self, request: libc::c_ulong, req: &mut libc::ifreq) -> io::Result<()> {
            if unsafe { libc::ioctl(self.0, request, req as *mut libc::ifreq) } < 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        }
    }

    impl Drop for CtlSocket {
        fn drop(&mut self) {
            unsafe { libc::close(self.0) };
        }
    }

    fn ifreq(name: &str) -> io::Result<libc::ifreq> {
        let mut req: libc::ifreq = unsafe { std::mem::zeroed() };
        let bytes = name.as_bytes();
        if bytes.len() >= req.ifr_name.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("interface name too long: {}", name),
            ));
        }
        for (dst, src) in req.ifr_name.iter_mut().zip(bytes) {
            *dst = *src as libc::c_char;
        }
        Ok(req)
    }

    fn write_addr(req: &mut libc::ifreq, addr: Ipv4Addr) {
        let sin = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: 0,
            // octets are already in network order in memory
            sin_addr: libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.octets()),
            },
            sin_zero: [0; 8],
        };
        unsafe {
            let dst = &mut req.ifr_ifru.ifru_addr as *mut libc::sockaddr as *mut libc::sockaddr_in;
            *dst = sin;
        }
    }

    pub fn set_ip(name: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> crate::Result<()> {
        let sock = CtlSocket::open()?;

        let mut req = ifreq(name)?;
        write_addr(&mut req, ip);
        sock.ioctl(libc::SIOCSIFADDR, &mut req)
            .map_err(|e| format!("set address on {}: {}", name, e))?;

        let mut req = ifreq(name)?;
        write_addr(&mut req, netmask);
        sock.ioctl(libc::SIOCSIFNETMASK, &mut req)
            .map_err(|e| format!("set netmask on {}: {}", name, e))?;

        Ok(())
    }

    pub fn set_mtu(name: &str, mtu: u16) -> crate::Result<()> {
        let sock = CtlSocket::open()?;
        let mut req = ifreq(name)?;
        unsafe {
            req.ifr_ifru.ifru_mtu = mtu as libc::c_int;
        }
        sock.ioctl(libc::SIOCSIFMTU, &mut req)
            .map_err(|e| format!("set mtu on {}: {}", name, e))?;
        Ok(())
    }

    pub fn up(name: &str) -> crate::Result<()> {
        let sock = CtlSocket::open()?;
        let mut req = ifreq(name)?;
        sock.ioctl(libc::SIOCGIFFLAGS, &mut req)
            .map_err(|e| format!("get flags on {}: {}", name, e))?;
        unsafe {
            req.ifr_ifru.ifru_flags |= (libc::IFF_UP | libc::IFF_RUNNING) as libc::c_short;
        }
        sock.ioctl(libc::SIOCSIFFLAGS, &mut req)
            .map_err(|e| format!("set flags on {}: {}", name, e))?;
        Ok(())
    }

    pub fn down(name: &str) -> crate::Result<()> {
        let sock = CtlSocket::open()?;
        let mut req = ifreq(name)?;
        sock.ioctl(libc::SIOCGIFFLAGS, &mut req)
            .map_err(|e| format!("get flags on {}: {}", name, e))?;
        unsafe {
            req.ifr_ifru.ifru_flags &= !(libc::IFF_UP as libc::c_short);
        }
        sock.ioctl(libc::SIOCSIFFLAGS, &mut req)
            .map_err(|e| format!("set flags on {}: {}", name, e))?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use std::net::Ipv4Addr;
    use std::process::Command;

    fn ifconfig(args: &[&str]) -> crate::Result<()> {
        let output = Command::new("ifconfig")
            .args(args)
            .output()
            .map_err(|e| format!("failed to execute ifconfig: {}", e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("ifconfig {:?} failed: {}", args, stderr.trim()).into());
        }
        Ok(())
    }

    pub fn set_ip(name: &str, ip: Ipv4Addr, netmask: Ipv4Addr) -> crate::Result<()> {
        ifconfig(&[
            name,
            "inet",
            &ip.to_string(),
            "netmask",
            &netmask.to_string(),
        ])
    }

    pub fn set_mtu(name: &str, mtu: u16) -> crate::Result<()> {
        ifconfig(&[name, "mtu", &mtu.to_string()])
    }

    pub fn up(name: &str) -> crate::Result<()> {
        ifconfig(&[name, "up"])
    }

    pub fn down(name: &str) -> crate::Result<()> {
        ifconfig(&[name, "down"])
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod imp {
    use std::net::Ipv4Addr;

    pub fn set_ip(_name: &str, _ip: Ipv4Addr, _netmask: Ipv4Addr) -> crate::Result<()> {
        Err("interface configuration is not supported on this platform".into())
    }

    pub fn set_mtu(_name: &str, _mtu: u16) -> crate::Result<()> {
        Err("interface configuration is not supported on this platform".into())
    }

    pub fn up(_name: &str) -> crate::Result<()> {
        Err("interface configuration is not supported on this platform".into())
    }

    pub fn down(_name: &str) -> crate::Result<()> {
        Err("interface configuration is not supported on this platform".into())
    }
}
