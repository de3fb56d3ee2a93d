//! Ban-set persistence for the expiry daemon.
//!
//! The state file is plain text, one `<table>\t<value>\t<address>` entry per
//! line, with `#` comment lines. It is rewritten in full on every save (via
//! a sibling temp file and rename) and only loaded back when it is a regular
//! file owned by root and not writable by group or other.

use std::fs::{self, File, Permissions};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use nix::sys::stat::{self, Mode, SFlag};
use nix::unistd::{self, Uid};
use thiserror::Error;

use crate::block;
use crate::fw::BanTable;
use crate::local::LocalAddrs;
use crate::resolver::Resolver;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot examine state file: {0}")]
    Stat(#[from] nix::Error),
    #[error("state file must be a regular file owned by root and writable only by its owner")]
    NotTrusted,
}

/// Write a snapshot of every watched table to `path`.
pub fn save(fw: &mut dyn BanTable, tables: &[u16], path: &Path) -> Result<(), Error> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut file = File::create(&tmp)?;
        let stamp = humantime::format_rfc3339_seconds(SystemTime::now());
        writeln!(file, "# logban ban table state {stamp}")?;
        writeln!(file, "# table\tvalue\taddress")?;
        for &table in tables {
            match fw.entries(table) {
                Ok(entries) => {
                    for entry in entries {
                        writeln!(file, "{table}\t{}\t{}", entry.value, entry.addr)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(table, error = %e, "failed to list ban table for state save");
                }
            }
        }
        file.set_permissions(Permissions::from_mode(0o644))?;
    }

    if let Err(e) = unistd::chown(&tmp, Some(Uid::from_raw(0)), None) {
        tracing::debug!(error = %e, "could not chown state file to root");
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Re-insert every entry recorded in `path` into its ban table.
pub fn load(
    fw: &mut dyn BanTable,
    resolver: &dyn Resolver,
    local: &mut LocalAddrs,
    path: &Path,
) -> Result<(), Error> {
    check_trusted(path)?;
    let file = File::open(path)?;
    restore(BufReader::new(file), fw, resolver, local);
    Ok(())
}

fn check_trusted(path: &Path) -> Result<(), Error> {
    let st = stat::stat(path)?;
    let kind = SFlag::from_bits_truncate(st.st_mode);
    let mode = Mode::from_bits_truncate(st.st_mode);
    if st.st_uid != 0
        || kind & SFlag::S_IFMT != SFlag::S_IFREG
        || mode.intersects(Mode::S_IWGRP | Mode::S_IWOTH)
    {
        return Err(Error::NotTrusted);
    }
    Ok(())
}

fn restore<R: BufRead>(
    reader: R,
    fw: &mut dyn BanTable,
    resolver: &dyn Resolver,
    local: &mut LocalAddrs,
) {
    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "error reading state file");
                return;
            }
        };
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_entry(&line) {
            Some((table, value, host)) => {
                block::restore_host(fw, resolver, local, host, value, table);
            }
            None => tracing::info!(line = idx + 1, "skipping invalid state file entry"),
        }
    }
}

fn parse_entry(line: &str) -> Option<(u16, u32, &str)> {
    let mut fields = line.split_whitespace();
    let table = fields.next()?.parse().ok()?;
    let value = fields.next()?.parse().ok()?;
    let host = fields.next()?;
    Some((table, value, host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fw::memory::MemoryBackend;
    use std::io::Cursor;
    use std::net::IpAddr;

    struct LiteralResolver;

    impl Resolver for LiteralResolver {
        fn resolve(&self, host: &str) -> Vec<IpAddr> {
            host.parse().map(|a| vec![a]).unwrap_or_default()
        }
    }

    #[test]
    fn parses_valid_entries() {
        assert_eq!(parse_entry("1\t620\t192.0.2.1"), Some((1, 620, "192.0.2.1")));
        assert_eq!(parse_entry("20 0 2001:db8::1"), Some((20, 0, "2001:db8::1")));
        assert_eq!(parse_entry("1\t620"), None);
        assert_eq!(parse_entry("one\t620\t192.0.2.1"), None);
        assert_eq!(parse_entry("1\tsoon\t192.0.2.1"), None);
        assert_eq!(parse_entry(""), None);
    }

    #[test]
    fn save_then_restore_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state");

        let mut fw = MemoryBackend::new();
        fw.add("192.0.2.1".parse()?, 620, 1)?;
        fw.add("192.0.2.2".parse()?, 0, 1)?;
        fw.add("2001:db8::7".parse()?, 99, 6)?;
        save(&mut fw, &[1, 6], &path)?;

        let mut restored = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        restore(
            BufReader::new(File::open(&path)?),
            &mut restored,
            &LiteralResolver,
            &mut local,
        );
        assert_eq!(restored.value(1, "192.0.2.1".parse()?), Some(620));
        assert_eq!(restored.value(1, "192.0.2.2".parse()?), Some(0));
        assert_eq!(restored.value(6, "2001:db8::7".parse()?), Some(99));

        Ok(())
    }

    #[test]
    fn restore_skips_comments_and_garbage() {
        let mut fw = MemoryBackend::new();
        let mut local = LocalAddrs::new();
        let input = "# header\n\nnot a line\n1\t50\t192.0.2.1\n1\t\t192.0.2.2\n";
        restore(Cursor::new(input), &mut fw, &LiteralResolver, &mut local);
        assert_eq!(fw.len(1), 1);
        assert_eq!(fw.value(1, "192.0.2.1".parse().unwrap()), Some(50));
    }

    #[test]
    fn group_writable_state_file_is_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state");
        fs::write(&path, "1\t1\t192.0.2.1\n")?;
        fs::set_permissions(&path, Permissions::from_mode(0o666))?;

        assert!(matches!(check_trusted(&path), Err(Error::NotTrusted)));

        Ok(())
    }

    #[test]
    fn missing_state_file_reports_stat_error() {
        assert!(matches!(
            check_trusted(Path::new("/nonexistent/logban-state")),
            Err(Error::Stat(_))
        ));
    }
}
