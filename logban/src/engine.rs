//! The detection engine: drives log lines through the configured groups.

use rand::Rng;

use logban_lib::block;
use logban_lib::fw::BanTable;
use logban_lib::local::LocalAddrs;
use logban_lib::resolver::Resolver;

use crate::group::{self, Group};

pub struct Engine {
    groups: Vec<Group>,
    fw: Box<dyn BanTable>,
    resolver: Box<dyn Resolver>,
    local: LocalAddrs,
    rng: rand::rngs::ThreadRng,
}

impl Engine {
    pub fn new(groups: Vec<Group>, fw: Box<dyn BanTable>, resolver: Box<dyn Resolver>) -> Self {
        Self {
            groups,
            fw,
            resolver,
            local: LocalAddrs::new(),
            rng: rand::rng(),
        }
    }

    /// Reload the local-interface snapshot; called once after privilege drop.
    pub fn refresh_local_interfaces(&mut self) {
        self.local.refresh();
    }

    pub fn close(&mut self) {
        self.fw.close();
    }

    /// Feed one log line through every group in declaration order.
    ///
    /// `now` is the line's observation time; each group's watch list is
    /// pruned with it before any host decision for this line.
    pub fn process_line(&mut self, line: &str, now: u64) {
        for gi in 0..self.groups.len() {
            {
                let group = &mut self.groups[gi];
                group.watch.prune(group.within_time, now);
            }
            let mut stop = false;
            for pi in 0..self.groups[gi].patterns.len() {
                let host = match self.groups[gi].patterns[pi].host_of(line) {
                    None => continue,
                    Some(None) => {
                        tracing::warn!(
                            pattern = self.groups[gi].patterns[pi].expr(),
                            line,
                            "matching pattern captured no host"
                        );
                        continue;
                    }
                    Some(Some(host)) => host.to_string(),
                };
                tracing::debug!(
                    pattern = self.groups[gi].patterns[pi].expr(),
                    line,
                    host = %host,
                    "pattern matched"
                );
                self.groups[gi].patterns[pi].matches += 1;
                self.check_host(gi, &host, now);

                let flags = self.groups[gi].flags;
                if !flags.cont {
                    stop = true;
                    break;
                }
                if flags.skip {
                    break;
                }
            }
            if stop {
                break;
            }
        }
    }

    // The per-host decision. The group's watch list has already been pruned
    // for this line's observation time.
    fn check_host(&mut self, gi: usize, host: &str, now: u64) {
        let (expiry, duration) = self.ban_expiry(gi, now);

        let bumped = self.groups[gi]
            .watch
            .find_mut(host)
            .map(|entry| {
                entry.count += 1;
                entry.count
            });

        if let Some(count) = bumped {
            tracing::debug!(%host, count, "increased hit count");
            let (max_count, flags) = (self.groups[gi].max_count, self.groups[gi].flags);
            if count == max_count {
                self.block(gi, host, expiry, duration);
            } else if count > max_count {
                if flags.warnfail && count == max_count + 1 {
                    tracing::warn!(%host, "hit from blocked host");
                }
                if flags.blockfail {
                    self.block(gi, host, expiry, duration);
                }
            }
            return;
        }

        let (max_count, max_hosts, flags, watched) = {
            let group = &self.groups[gi];
            (
                group.max_count,
                group.max_hosts,
                group.flags,
                group.watch.len() as u32,
            )
        };
        if max_hosts > 0 && watched >= max_hosts {
            if flags.warnmax {
                tracing::warn!("maximum number of watched hosts exceeded");
            }
            if flags.blockmax {
                tracing::info!(%host, "preemptively blocking host");
                self.block(gi, host, expiry, duration);
            } else {
                tracing::info!(%host, "ignoring host");
            }
        } else {
            self.groups[gi].watch.push(host, now);
            tracing::debug!(%host, "added host to watch list");
            if max_count == 1 {
                self.block(gi, host, expiry, duration);
            }
        }
    }

    // Candidate expiry for a block decision made at `now`: the group's reset
    // time with a fresh jitter draw, as epoch seconds. (0, 0) = permanent.
    fn ban_expiry(&mut self, gi: usize, now: u64) -> (u32, u64) {
        let group = &self.groups[gi];
        if group.reset_time == 0 {
            return (0, 0);
        }
        let mut duration = group.reset_time as f64;
        if group.random != 0 {
            let u: f64 = self.rng.random_range(-1.0..=1.0);
            duration += duration * u * f64::from(group.random) / 100.0;
        }
        let duration = duration.max(0.0) as u64;
        let expiry = u32::try_from(now.saturating_add(duration)).unwrap_or(u32::MAX);
        (expiry, duration)
    }

    fn block(&mut self, gi: usize, host: &str, expiry: u32, duration: u64) {
        let (table, allow_local) = {
            let group = &self.groups[gi];
            (group.table, group.flags.blocklocal)
        };
        block::block_host(
            self.fw.as_mut(),
            self.resolver.as_ref(),
            &mut self.local,
            host,
            expiry,
            table,
            duration,
            allow_local,
        );
    }

    /// Human-readable snapshot of every group, its pattern match counters and
    /// its watch entries, printed on the status-dump signal.
    pub fn status_dump(&self, now: u64) -> String {
        let mut out = String::new();
        for group in &self.groups {
            let flags = &group.flags;
            out.push_str(&format!(
                "[table={}, within={}, count={}, reset={}, random={}, continue={},\n",
                group.table,
                group.within_time,
                group.max_count,
                group.reset_time,
                group.random,
                flags.continue_value()
            ));
            out.push_str(&format!(
                " warnfail={}, onfail={}, maxhosts={}, warnmax={}, onmax={}, blocklocal={}]\n",
                group::yes_no(flags.warnfail),
                flags.onfail_value(),
                group.max_hosts,
                group::yes_no(flags.warnmax),
                flags.onmax_value(),
                group::yes_no(flags.blocklocal)
            ));
            out.push_str(&format!(
                "Number of patterns: {}\t\tCurrently watched hosts: {}\n",
                group.patterns.len(),
                group.watch.len()
            ));

            out.push_str("\nmatches\t\tpattern\n");
            out.push_str("-----------------------------------------------------------\n");
            for pattern in &group.patterns {
                out.push_str(&format!("{}\t\t{}\n", pattern.matches, pattern.expr()));
            }

            out.push_str("\nhost\t\t\tcount\texpires in\tstatus\n");
            out.push_str("-----------------------------------------------------------\n");
            for entry in group.watch.iter() {
                let remaining = (entry.first_seen + group.within_time) as i64 - now as i64;
                let status = if entry.count > group.max_count {
                    "failed"
                } else if entry.count == group.max_count {
                    "blocked"
                } else {
                    "watching"
                };
                out.push_str(&format!(
                    "{}\t\t\t{}\t{} sec\t\t{}\n",
                    entry.hostname, entry.count, remaining, status
                ));
            }
            out.push('\n');
        }
        out
    }
}
