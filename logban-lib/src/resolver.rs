//! Forward and reverse name resolution.

use std::net::IpAddr;

/// Resolution seam; the detection engine and state restore go through this.
pub trait Resolver {
    /// Resolve a hostname or address literal. Failures yield an empty list.
    fn resolve(&self, host: &str) -> Vec<IpAddr>;
}

/// System resolver (getaddrinfo).
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Vec<IpAddr> {
        match dns_lookup::lookup_host(host) {
            Ok(addrs) => {
                // getaddrinfo repeats addresses per socket type
                let mut unique: Vec<IpAddr> = Vec::with_capacity(addrs.len());
                for addr in addrs {
                    if !unique.contains(&addr) {
                        unique.push(addr);
                    }
                }
                unique
            }
            Err(e) => {
                tracing::warn!(%host, error = %e, "failed to resolve host");
                Vec::new()
            }
        }
    }
}

/// Reverse lookup for listings; `None` when no name is known.
pub fn reverse(addr: &IpAddr) -> Option<String> {
    dns_lookup::lookup_addr(addr).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_address_literals_without_dns() {
        let resolver = SystemResolver;
        assert_eq!(
            resolver.resolve("192.0.2.80"),
            vec!["192.0.2.80".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(
            resolver.resolve("2001:db8::2"),
            vec!["2001:db8::2".parse::<IpAddr>().unwrap()]
        );
    }

    #[test]
    fn unresolvable_host_yields_empty_list() {
        let resolver = SystemResolver;
        assert!(resolver.resolve("host.invalid.").is_empty());
    }
}
