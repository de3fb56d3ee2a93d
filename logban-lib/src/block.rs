//! High-level block operation: resolve a host and ban every address.

use crate::fw::{AddOutcome, BanTable};
use crate::local::LocalAddrs;
use crate::resolver::Resolver;

/// Resolve `host` and insert each address into ban table `table` with the
/// given expiry `value`. Local addresses are skipped unless `allow_local`.
///
/// `duration` is the effective ban length in seconds (0 = permanent) and
/// only flavours the log output. Returns the number of failed insertions;
/// addresses already present are refreshed and do not count as failures.
pub fn block_host(
    fw: &mut dyn BanTable,
    resolver: &dyn Resolver,
    local: &mut LocalAddrs,
    host: &str,
    value: u32,
    table: u16,
    duration: u64,
    allow_local: bool,
) -> usize {
    let mut failures = 0;
    for addr in resolver.resolve(host) {
        if !allow_local && local.is_local(addr) {
            tracing::info!(%addr, "not blocking local address");
            continue;
        }
        match fw.add(addr, value, table) {
            Ok(AddOutcome::Updated) => {
                tracing::info!(%addr, table, "address already in ban table, refreshed expiry");
            }
            Ok(AddOutcome::Added) => {
                if duration > 0 {
                    tracing::info!(%addr, table, seconds = duration, "added address to ban table");
                } else {
                    tracing::info!(%addr, table, "added address to ban table permanently");
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!(%addr, table, error = %e, "failed to add address to ban table");
            }
        }
    }
    failures
}

/// Re-insert a host with a stored expiry, as state restore does.
pub fn restore_host(
    fw: &mut dyn BanTable,
    resolver: &dyn Resolver,
    local: &mut LocalAddrs,
    host: &str,
    value: u32,
    table: u16,
) -> usize {
    block_host(fw, resolver, local, host, value, table, 0, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fw::memory::MemoryBackend;
    use std::net::IpAddr;

    struct StaticResolver;

    impl Resolver for StaticResolver {
        fn resolve(&self, host: &str) -> Vec<IpAddr> {
            match host {
                "multi.example" => vec!["192.0.2.1".parse().unwrap(), "2001:db8::1".parse().unwrap()],
                "half-local.example" => vec!["127.0.0.1".parse().unwrap(), "192.0.2.9".parse().unwrap()],
                other => other.parse().map(|a| vec![a]).unwrap_or_default(),
            }
        }
    }

    #[test]
    fn blocks_every_resolved_address() {
        let mut fw = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        let failures = block_host(
            &mut fw,
            &StaticResolver,
            &mut local,
            "multi.example",
            620,
            1,
            600,
            false,
        );
        assert_eq!(failures, 0);
        assert_eq!(fw.value(1, "192.0.2.1".parse().unwrap()), Some(620));
        assert_eq!(fw.value(1, "2001:db8::1".parse().unwrap()), Some(620));
    }

    #[test]
    fn never_bans_local_addresses_unless_allowed() {
        let mut fw = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        block_host(
            &mut fw,
            &StaticResolver,
            &mut local,
            "half-local.example",
            300,
            1,
            300,
            false,
        );
        assert_eq!(fw.value(1, "127.0.0.1".parse().unwrap()), None);
        assert_eq!(fw.value(1, "192.0.2.9".parse().unwrap()), Some(300));

        block_host(
            &mut fw,
            &StaticResolver,
            &mut local,
            "127.0.0.1",
            300,
            2,
            300,
            true,
        );
        assert_eq!(fw.value(2, "127.0.0.1".parse().unwrap()), Some(300));
    }

    #[test]
    fn reblocking_refreshes_the_expiry() {
        let mut fw = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        block_host(&mut fw, &StaticResolver, &mut local, "192.0.2.5", 100, 1, 60, false);
        block_host(&mut fw, &StaticResolver, &mut local, "192.0.2.5", 200, 1, 60, false);
        assert_eq!(fw.value(1, "192.0.2.5".parse().unwrap()), Some(200));
    }

    #[test]
    fn unresolvable_host_is_a_no_op() {
        let mut fw = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        let failures = block_host(
            &mut fw,
            &StaticResolver,
            &mut local,
            "not-an-address",
            100,
            1,
            60,
            false,
        );
        assert_eq!(failures, 0);
        assert_eq!(fw.len(1), 0);
    }
}
