//! Group-file parser.
//!
//! Line-oriented blocks: a `[key=value, key, ...]` header, one pattern per
//! line, and a blank line ending the block. `#` starts a comment, keys and
//! values are case-insensitive, whitespace around both is trimmed. Unknown
//! keys fail the group; empty keys are ignored.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::group::Group;
use crate::pattern::{self, Pattern};

pub const DEFAULT_PATH: &str = "/etc/logban.conf";

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid group line (missing [ ])")]
    MissingBrackets,
    #[error("invalid group line (unknown key `{0}`)")]
    UnknownKey(String),
    #[error("invalid group line (invalid value for `{0}`)")]
    InvalidValue(String),
    #[error(transparent)]
    Pattern(#[from] pattern::Error),
}

/// A rejected configuration line with its location.
#[derive(Debug)]
pub struct Issue {
    pub file: PathBuf,
    pub line: usize,
    pub error: Error,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}  {}", self.file.display(), self.line, self.error)
    }
}

/// Append every group in `path` to `groups`.
///
/// Syntax problems do not abort the scan; they come back as issues so the
/// caller can report all of them at once. A failed group header skips the
/// block's patterns, and a block that ends up without patterns is dropped.
pub fn read_file(path: &Path, groups: &mut Vec<Group>) -> io::Result<Vec<Issue>> {
    let file = File::open(path)?;
    let mut issues = Vec::new();
    let mut lines = BufReader::new(file).lines();
    let mut lineno = 0usize;

    loop {
        // find the next group header
        let header = loop {
            match lines.next() {
                None => return Ok(issues),
                Some(Err(e)) => return Err(e),
                Some(Ok(line)) => {
                    lineno += 1;
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    break line;
                }
            }
        };

        let mut group = match parse_header(&header) {
            Ok(group) => Some(group),
            Err(error) => {
                issues.push(Issue {
                    file: path.to_path_buf(),
                    line: lineno,
                    error,
                });
                None
            }
        };

        // pattern lines until a blank line or EOF
        loop {
            match lines.next() {
                None => break,
                Some(Err(e)) => return Err(e),
                Some(Ok(line)) => {
                    lineno += 1;
                    if line.is_empty() {
                        break;
                    }
                    if line.starts_with('#') {
                        continue;
                    }
                    if let Some(group) = group.as_mut() {
                        match Pattern::compile(&line) {
                            Ok(pattern) => group.patterns.push(pattern),
                            Err(error) => issues.push(Issue {
                                file: path.to_path_buf(),
                                line: lineno,
                                error: error.into(),
                            }),
                        }
                    }
                }
            }
        }

        if let Some(group) = group.take()
            && !group.patterns.is_empty()
        {
            groups.push(group);
        }
    }
}

fn parse_header(line: &str) -> Result<Group, Error> {
    let inner = line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or(Error::MissingBrackets)?;

    let mut group = Group::default();
    for item in inner.split(',') {
        let (key, value) = match item.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (item.trim(), None),
        };
        let key = key.to_ascii_lowercase();
        let value = value.map(str::to_ascii_lowercase);
        let value = value.as_deref();
        match key.as_str() {
            "" => continue,
            "continue" => match value {
                None | Some("yes") => {
                    group.flags.cont = true;
                    group.flags.skip = false;
                }
                Some("no") => group.flags.cont = false,
                Some("next") | Some("nextblock") | Some("skip") => {
                    group.flags.cont = true;
                    group.flags.skip = true;
                }
                _ => return Err(Error::InvalidValue(key)),
            },
            "warnfail" => group.flags.warnfail = yes_no(value, &key)?,
            "warnmax" => group.flags.warnmax = yes_no(value, &key)?,
            "blocklocal" => group.flags.blocklocal = yes_no(value, &key)?,
            "onfail" => group.flags.blockfail = block_ignore(value, &key)?,
            "onmax" => group.flags.blockmax = block_ignore(value, &key)?,
            "random" | "randomize" => match value {
                None => return Err(Error::InvalidValue(key)),
                Some("no") => group.random = 0,
                Some(v) => {
                    let percent: i32 = v.parse().map_err(|_| Error::InvalidValue(key.clone()))?;
                    if percent.unsigned_abs() > 100 {
                        return Err(Error::InvalidValue(key));
                    }
                    group.random = percent;
                }
            },
            "maxhosts" => {
                let max: u32 = number(value, &key)?;
                if max == 0 {
                    return Err(Error::InvalidValue(key));
                }
                group.max_hosts = max;
            }
            "count" => group.max_count = number(value, &key)?,
            "within" => group.within_time = number(value, &key)?,
            "reset" => group.reset_time = number(value, &key)?,
            "table" => {
                let table: u16 = number(value, &key)?;
                if table == 0 {
                    return Err(Error::InvalidValue(key));
                }
                group.table = table;
            }
            _ => return Err(Error::UnknownKey(key)),
        }
    }
    Ok(group)
}

fn yes_no(value: Option<&str>, key: &str) -> Result<bool, Error> {
    match value {
        None | Some("yes") => Ok(true),
        Some("no") => Ok(false),
        _ => Err(Error::InvalidValue(key.to_string())),
    }
}

fn block_ignore(value: Option<&str>, key: &str) -> Result<bool, Error> {
    match value {
        Some("block") => Ok(true),
        Some("none") | Some("ignore") => Ok(false),
        _ => Err(Error::InvalidValue(key.to_string())),
    }
}

fn number<T: std::str::FromStr>(value: Option<&str>, key: &str) -> Result<T, Error> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::InvalidValue(key.to_string()))
}
