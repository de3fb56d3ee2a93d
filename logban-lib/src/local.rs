//! Locality check: is an address one of ours?

use std::net::IpAddr;

use nix::ifaddrs;

/// Cached snapshot of every address bound to a local interface.
///
/// The snapshot loads lazily on first use and is dropped by [`refresh`];
/// callers refresh once after privilege drop so chrooted operation still
/// sees the correct set.
///
/// [`refresh`]: LocalAddrs::refresh
#[derive(Debug, Default)]
pub struct LocalAddrs {
    cached: Option<Vec<IpAddr>>,
}

impl LocalAddrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the snapshot so the next check reloads it.
    pub fn refresh(&mut self) {
        self.cached = None;
    }

    /// True for loopback and for addresses bound to any local interface.
    pub fn is_local(&mut self, addr: IpAddr) -> bool {
        if addr.is_loopback() {
            return true;
        }
        self.cached.get_or_insert_with(interface_addrs).contains(&addr)
    }
}

fn interface_addrs() -> Vec<IpAddr> {
    let mut out = Vec::new();
    match ifaddrs::getifaddrs() {
        Ok(interfaces) => {
            for interface in interfaces {
                let Some(address) = interface.address else {
                    continue;
                };
                if let Some(sin) = address.as_sockaddr_in() {
                    out.push(IpAddr::V4(sin.ip()));
                } else if let Some(sin6) = address.as_sockaddr_in6() {
                    out.push(IpAddr::V6(sin6.ip()));
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to enumerate local interfaces"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_always_local() {
        let mut local = LocalAddrs::new();
        assert!(local.is_local("127.0.0.1".parse().unwrap()));
        assert!(local.is_local("127.4.5.6".parse().unwrap()));
        assert!(local.is_local("::1".parse().unwrap()));
    }

    #[test]
    fn documentation_addresses_are_not_local() {
        let mut local = LocalAddrs::new();
        assert!(!local.is_local("203.0.113.77".parse().unwrap()));
        assert!(!local.is_local("2001:db8::dead".parse().unwrap()));
    }

    #[test]
    fn refresh_reloads_the_snapshot() {
        let mut local = LocalAddrs::new();
        assert!(!local.is_local("203.0.113.77".parse().unwrap()));
        local.refresh();
        assert!(local.cached.is_none());
        assert!(!local.is_local("203.0.113.77".parse().unwrap()));
        assert!(local.cached.is_some());
    }
}
