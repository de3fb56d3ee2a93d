//! nftables backend driving the `nft` binary.
//!
//! All ban tables live in one nftables table `inet logban`. Each 16-bit ban
//! table id becomes a pair of named maps, `ban<id>v4` and `ban<id>v6`, typed
//! `ipv4_addr : mark` / `ipv6_addr : mark`; the mark carries the expiry value.

use std::io::Write;
use std::net::IpAddr;
use std::process::{Command, Stdio};

use serde::Deserialize;

use super::{AddOutcome, BanTable, Entry, Error};

const NFT: &str = "nft";
const TABLE: &str = "logban";

pub struct NftBackend;

impl NftBackend {
    pub fn new() -> Self {
        Self
    }
}

fn map_name(table: u16, v6: bool) -> String {
    if v6 {
        format!("ban{table}v6")
    } else {
        format!("ban{table}v4")
    }
}

fn map_for(table: u16, addr: IpAddr) -> String {
    map_name(table, addr.is_ipv6())
}

fn run(args: &[&str]) -> Result<String, Error> {
    let command = || format!("{NFT} {}", args.join(" "));
    let output = Command::new(NFT)
        .args(args)
        .output()
        .map_err(|source| Error::Spawn {
            command: command(),
            source,
        })?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(Error::Backend {
            command: command(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

// Feeds a ruleset fragment through `nft -f -` so table and map creation
// happens in one atomic batch.
fn run_batch(script: &str) -> Result<(), Error> {
    let command = || format!("{NFT} -f -");
    let mut child = Command::new(NFT)
        .args(["-f", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| Error::Spawn {
            command: command(),
            source,
        })?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|source| Error::Spawn {
                command: command(),
                source,
            })?;
    }
    let output = child.wait_with_output().map_err(|source| Error::Spawn {
        command: command(),
        source,
    })?;
    if output.status.success() {
        Ok(())
    } else {
        Err(Error::Backend {
            command: command(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

fn is_exists(err: &Error) -> bool {
    matches!(err, Error::Backend { stderr, .. } if stderr.contains("File exists"))
}

fn is_missing(err: &Error) -> bool {
    matches!(err, Error::Backend { stderr, .. } if stderr.contains("No such file or directory"))
}

impl BanTable for NftBackend {
    fn open(&mut self, tables: &[u16]) -> Result<(), Error> {
        let mut script = format!("add table inet {TABLE}\n");
        for &table in tables {
            for v6 in [false, true] {
                let kind = if v6 { "ipv6_addr" } else { "ipv4_addr" };
                let map = map_name(table, v6);
                script.push_str(&format!(
                    "add map inet {TABLE} {map} {{ type {kind} : mark ; }}\n"
                ));
            }
        }
        tracing::debug!(tables = ?tables, "preparing nftables maps");
        run_batch(&script)
    }

    fn add(&mut self, addr: IpAddr, value: u32, table: u16) -> Result<AddOutcome, Error> {
        let map = map_for(table, addr);
        let element = format!("{{ {addr} : {value} }}");
        match run(&["add", "element", "inet", TABLE, &map, &element]) {
            Ok(_) => Ok(AddOutcome::Added),
            Err(e) if is_exists(&e) => {
                // nft maps reject duplicate keys, so refresh by replacing
                run(&["delete", "element", "inet", TABLE, &map, &format!("{{ {addr} }}")])?;
                run(&["add", "element", "inet", TABLE, &map, &element])?;
                Ok(AddOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }

    fn del(&mut self, addr: IpAddr, table: u16) -> Result<(), Error> {
        let map = map_for(table, addr);
        match run(&["delete", "element", "inet", TABLE, &map, &format!("{{ {addr} }}")]) {
            Ok(_) => Ok(()),
            Err(e) if is_missing(&e) => Err(Error::NoEntry { addr, table }),
            Err(e) => Err(e),
        }
    }

    fn entries(&mut self, table: u16) -> Result<Vec<Entry>, Error> {
        let mut out = Vec::new();
        for v6 in [false, true] {
            let map = map_name(table, v6);
            let json = run(&["-j", "list", "map", "inet", TABLE, &map])?;
            out.extend(parse_entries(&json)?);
        }
        Ok(out)
    }
}

#[derive(Deserialize)]
struct ListDoc {
    nftables: Vec<ListNode>,
}

#[derive(Deserialize)]
struct ListNode {
    map: Option<MapNode>,
}

#[derive(Deserialize)]
struct MapNode {
    #[serde(default)]
    elem: Vec<(serde_json::Value, serde_json::Value)>,
}

// Map keys are plain address strings unless nft attaches per-element
// attributes, in which case the key hides behind {"elem": {"val": ...}}.
fn elem_addr(value: &serde_json::Value) -> Option<IpAddr> {
    if let Some(s) = value.as_str() {
        return s.parse().ok();
    }
    value.get("elem")?.get("val")?.as_str()?.parse().ok()
}

fn parse_entries(json: &str) -> Result<Vec<Entry>, Error> {
    let doc: ListDoc =
        serde_json::from_str(json).map_err(|e| Error::Output(format!("invalid nft JSON: {e}")))?;
    let mut out = Vec::new();
    for node in doc.nftables {
        let Some(map) = node.map else { continue };
        for (key, value) in map.elem {
            let addr = elem_addr(&key)
                .ok_or_else(|| Error::Output(format!("unexpected map key: {key}")))?;
            let value = value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| Error::Output(format!("unexpected map value: {value}")))?;
            out.push(Entry { addr, value });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_map_listing() -> anyhow::Result<()> {
        let json = r#"{"nftables": [
            {"metainfo": {"version": "1.0.9", "json_schema_version": 1}},
            {"map": {"family": "inet", "name": "ban1v4", "table": "logban",
                     "type": "ipv4_addr", "handle": 7, "map": "mark",
                     "elem": [["192.0.2.7", 620], ["198.51.100.1", 0]]}}
        ]}"#;
        let entries = parse_entries(json)?;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].addr, "192.0.2.7".parse::<IpAddr>()?);
        assert_eq!(entries[0].value, 620);
        assert_eq!(entries[1].value, 0);

        Ok(())
    }

    #[test]
    fn parses_empty_map_listing() -> anyhow::Result<()> {
        let json = r#"{"nftables": [
            {"metainfo": {"version": "1.0.9", "json_schema_version": 1}},
            {"map": {"family": "inet", "name": "ban1v6", "table": "logban",
                     "type": "ipv6_addr", "handle": 8, "map": "mark"}}
        ]}"#;
        assert!(parse_entries(json)?.is_empty());

        Ok(())
    }

    #[test]
    fn parses_wrapped_elements() -> anyhow::Result<()> {
        let json = r#"{"nftables": [
            {"map": {"family": "inet", "name": "ban1v4", "table": "logban",
                     "elem": [[{"elem": {"val": "203.0.113.9"}}, 99]]}}
        ]}"#;
        let entries = parse_entries(json)?;
        assert_eq!(entries[0].addr, "203.0.113.9".parse::<IpAddr>()?);
        assert_eq!(entries[0].value, 99);

        Ok(())
    }

    #[test]
    fn rejects_garbage_output() {
        assert!(parse_entries("not json").is_err());
    }

    #[test]
    fn names_maps_by_family() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert_eq!(map_for(4, v4), "ban4v4");
        assert_eq!(map_for(4, v6), "ban4v6");
    }
}
