//! Ban-table client: named address→value tables behind a backend trait.
//!
//! A ban table maps addresses to a u32 value, used by both daemons as a
//! Unix-epoch expiry in seconds (0 = no expiry recorded). The production
//! implementation is [`nft::NftBackend`]; tests use [`memory::MemoryBackend`].

use std::net::IpAddr;

use thiserror::Error;

pub mod memory;
pub mod nft;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` failed: {stderr}")]
    Backend { command: String, stderr: String },
    #[error("unexpected backend output: {0}")]
    Output(String),
    #[error("no entry for {addr} in ban table {table}")]
    NoEntry { addr: IpAddr, table: u16 },
}

/// Result of inserting an address into a ban table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// The address was not present before.
    Added,
    /// The address was already present; its stored value has been refreshed.
    Updated,
}

/// One address→value binding in a ban table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub addr: IpAddr,
    pub value: u32,
}

/// Backend seam for the kernel ban tables.
///
/// Both IPv4 and IPv6 addresses are accepted. `add` on an existing address
/// refreshes its value, so re-blocking a host extends the ban.
pub trait BanTable {
    /// Prepare the named ban tables. Failure here is fatal to the caller.
    fn open(&mut self, tables: &[u16]) -> Result<(), Error>;

    /// Insert `addr` with `value`; a duplicate refreshes the stored value.
    fn add(&mut self, addr: IpAddr, value: u32, table: u16) -> Result<AddOutcome, Error>;

    /// Remove `addr`; removing an absent entry is an error.
    fn del(&mut self, addr: IpAddr, table: u16) -> Result<(), Error>;

    /// Snapshot of all entries in `table`, taken up front so the caller may
    /// mutate the table while walking the result.
    fn entries(&mut self, table: u16) -> Result<Vec<Entry>, Error>;

    /// Release the backend connection.
    fn close(&mut self) {}
}
