use clap::{ArgAction, Parser};

use std::path::PathBuf;
use std::process;

/// Watch a log stream on stdin and ban matching hosts in nftables
#[derive(Clone, Debug, Parser)]
#[command(name = "logban")]
pub struct Cli {
    /// Configuration file with pattern groups to match against (repeatable)
    #[arg(short = 'f', long = "file")]
    pub files: Vec<PathBuf>,

    /// Chroot to this directory before entering the main loop
    #[arg(short = 'd', long = "directory")]
    pub directory: Option<PathBuf>,

    /// Drop privileges to run as this user
    #[arg(short = 'u', long = "user")]
    pub user: Option<String>,

    /// Drop privileges to run as this group
    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    /// Check the configuration for errors and exit
    #[arg(short = 'c', long = "check")]
    pub check: bool,

    /// Decrease the logging level (repeat for less)
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    /// Increase the logging level (repeat for more)
    #[arg(short = 'V', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Print version and build information
    #[arg(short = 'v', long = "version")]
    pub version: bool,
}

pub fn parse() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            process::exit(exitcode::USAGE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cli_with_no_arguments() -> anyhow::Result<()> {
        let args = Cli::try_parse_from(["logban"])?;
        assert!(args.files.is_empty());
        assert!(!args.check);
        assert_eq!(args.quiet, 0);
        assert_eq!(args.verbose, 0);

        Ok(())
    }

    #[test]
    fn config_files_accumulate_in_order() -> anyhow::Result<()> {
        let args = Cli::try_parse_from(["logban", "-f", "/etc/a.conf", "-f", "/etc/b.conf"])?;
        assert_eq!(
            args.files,
            vec![PathBuf::from("/etc/a.conf"), PathBuf::from("/etc/b.conf")]
        );

        Ok(())
    }

    #[test]
    fn verbosity_flags_are_counted() -> anyhow::Result<()> {
        let args = Cli::try_parse_from(["logban", "-VVq"])?;
        assert_eq!(args.verbose, 2);
        assert_eq!(args.quiet, 1);

        Ok(())
    }

    #[test]
    fn lowercase_v_is_version_not_verbose() -> anyhow::Result<()> {
        let args = Cli::try_parse_from(["logban", "-v"])?;
        assert!(args.version);
        assert_eq!(args.verbose, 0);

        Ok(())
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(Cli::try_parse_from(["logban", "-x"]).is_err());
    }
}
