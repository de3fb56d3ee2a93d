//! In-memory ban-table backend for tests.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

use super::{AddOutcome, BanTable, Entry, Error};

#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: HashMap<u16, BTreeMap<IpAddr, u32>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, table: u16, addr: IpAddr) -> Option<u32> {
        self.tables.get(&table)?.get(&addr).copied()
    }

    pub fn len(&self, table: u16) -> usize {
        self.tables.get(&table).map_or(0, BTreeMap::len)
    }
}

impl BanTable for MemoryBackend {
    fn open(&mut self, tables: &[u16]) -> Result<(), Error> {
        for &table in tables {
            self.tables.entry(table).or_default();
        }
        Ok(())
    }

    fn add(&mut self, addr: IpAddr, value: u32, table: u16) -> Result<AddOutcome, Error> {
        match self.tables.entry(table).or_default().insert(addr, value) {
            None => Ok(AddOutcome::Added),
            Some(_) => Ok(AddOutcome::Updated),
        }
    }

    fn del(&mut self, addr: IpAddr, table: u16) -> Result<(), Error> {
        self.tables
            .get_mut(&table)
            .and_then(|entries| entries.remove(&addr))
            .map(|_| ())
            .ok_or(Error::NoEntry { addr, table })
    }

    fn entries(&mut self, table: u16) -> Result<Vec<Entry>, Error> {
        Ok(self
            .tables
            .get(&table)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(&addr, &value)| Entry { addr, value })
                    .collect()
            })
            .unwrap_or_default())
    }
}
