use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid regular expression: {0}")]
    Syntax(#[from] regex::Error),
    #[error("regular expression has no capture groups")]
    NoCaptures,
}

/// A compiled case-insensitive pattern with at least one capture group.
///
/// The capture named `host`, or else capture 1, yields the host to act on.
#[derive(Debug)]
pub struct Pattern {
    re: Regex,
    expr: String,
    /// How often this pattern matched.
    pub matches: u64,
}

impl Pattern {
    pub fn compile(expr: &str) -> Result<Self, Error> {
        let re = RegexBuilder::new(expr).case_insensitive(true).build()?;
        // captures_len counts the implicit whole-match group
        if re.captures_len() < 2 {
            return Err(Error::NoCaptures);
        }
        Ok(Self {
            re,
            expr: expr.to_string(),
            matches: 0,
        })
    }

    pub fn expr(&self) -> &str {
        &self.expr
    }

    /// `None`: no match. `Some(None)`: matched, but without a usable host
    /// capture. `Some(Some(host))`: matched with a host.
    pub fn host_of<'l>(&self, line: &'l str) -> Option<Option<&'l str>> {
        let caps = self.re.captures(line)?;
        let host = caps
            .name("host")
            .or_else(|| caps.get(1))
            .map(|m| m.as_str())
            .filter(|host| !host.is_empty());
        Some(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_expressions_without_captures() {
        assert!(matches!(Pattern::compile("no captures here"), Err(Error::NoCaptures)));
        assert!(matches!(Pattern::compile(""), Err(Error::NoCaptures)));
        assert!(matches!(Pattern::compile("broken ["), Err(Error::Syntax(_))));
    }

    #[test]
    fn prefers_the_named_host_capture() -> anyhow::Result<()> {
        let pattern = Pattern::compile(r"^(\S+) attacked from (?<host>\S+)$")?;
        assert_eq!(pattern.host_of("sshd attacked from 192.0.2.1"), Some(Some("192.0.2.1")));

        Ok(())
    }

    #[test]
    fn falls_back_to_the_first_capture() -> anyhow::Result<()> {
        let pattern = Pattern::compile(r"^Failed login from (\S+)")?;
        assert_eq!(pattern.host_of("Failed login from 192.0.2.2 port 22"), Some(Some("192.0.2.2")));

        Ok(())
    }

    #[test]
    fn matches_case_insensitively() -> anyhow::Result<()> {
        let pattern = Pattern::compile(r"^fail (?<host>\S+)$")?;
        assert_eq!(pattern.host_of("FAIL evil.example"), Some(Some("evil.example")));

        Ok(())
    }

    #[test]
    fn distinguishes_no_match_from_empty_capture() -> anyhow::Result<()> {
        let pattern = Pattern::compile(r"^Fail (?<host>\S*)$")?;
        assert_eq!(pattern.host_of("nothing to see"), None);
        assert_eq!(pattern.host_of("Fail "), Some(None));

        Ok(())
    }
}
