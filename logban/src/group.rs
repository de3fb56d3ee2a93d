use crate::pattern::Pattern;
use crate::watch::WatchList;

/// Flow-control and policy flags, named after their configuration keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flags {
    /// Keep matching further patterns and groups after a hit.
    pub cont: bool,
    /// With `cont`: stop this group after a hit, continue with the next.
    pub skip: bool,
    /// Warn once on the first hit from an already blocked host.
    pub warnfail: bool,
    /// Re-block on hits from an already blocked host.
    pub blockfail: bool,
    /// Warn when the watch list is full.
    pub warnmax: bool,
    /// Preemptively block hosts that do not fit the watch list.
    pub blockmax: bool,
    /// Allow blocking local addresses.
    pub blocklocal: bool,
}

impl Default for Flags {
    fn default() -> Self {
        Self {
            cont: false,
            skip: false,
            warnfail: false,
            blockfail: true,
            warnmax: true,
            blockmax: true,
            blocklocal: false,
        }
    }
}

impl Flags {
    pub fn continue_value(&self) -> &'static str {
        if self.cont {
            if self.skip { "next" } else { "yes" }
        } else {
            "no"
        }
    }

    pub fn onfail_value(&self) -> &'static str {
        if self.blockfail { "block" } else { "ignore" }
    }

    pub fn onmax_value(&self) -> &'static str {
        if self.blockmax { "block" } else { "ignore" }
    }
}

pub fn yes_no(flag: bool) -> &'static str {
    if flag { "yes" } else { "no" }
}

/// One blocking group: counting policy, pattern set and live watch list.
#[derive(Debug)]
pub struct Group {
    /// Destination ban table.
    pub table: u16,
    /// Hits required to trigger a block.
    pub max_count: u32,
    /// Sliding window in seconds for hit counting.
    pub within_time: u64,
    /// Base ban duration in seconds; 0 = permanent.
    pub reset_time: u64,
    /// Jitter applied to the ban duration, in percent of `reset_time`.
    pub random: i32,
    /// Watch-list capacity; 0 = unbounded.
    pub max_hosts: u32,
    pub flags: Flags,
    pub patterns: Vec<Pattern>,
    pub watch: WatchList,
}

impl Default for Group {
    // 4 hits within 60 seconds, ban for 10 minutes in table 1 with ±30%
    // jitter, unbounded watch list
    fn default() -> Self {
        Self {
            table: 1,
            max_count: 4,
            within_time: 60,
            reset_time: 600,
            random: 30,
            max_hosts: 0,
            flags: Flags::default(),
            patterns: Vec::new(),
            watch: WatchList::new(),
        }
    }
}

/// Distinct ban tables referenced by the groups.
pub fn tables(groups: &[Group]) -> Vec<u16> {
    let mut tables: Vec<u16> = groups.iter().map(|g| g.table).collect();
    tables.sort_unstable();
    tables.dedup();
    tables
}
