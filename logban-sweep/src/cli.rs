use clap::{ArgAction, Parser};

use std::path::PathBuf;
use std::process;

/// Purge expired entries from nftables ban tables
#[derive(Clone, Debug, Parser)]
#[command(name = "logban-sweep")]
pub struct Cli {
    /// Comma separated list of ban table ids to operate on
    #[arg(
        short = 't',
        long = "table",
        required = true,
        value_delimiter = ',',
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub tables: Vec<u16>,

    /// Time in seconds between purging expired hosts
    #[arg(
        short = 's',
        long = "sleep",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sleep: u64,

    /// Save and restore the state of the ban tables in this file
    #[arg(short = 'S', long = "statefile")]
    pub state_file: Option<PathBuf>,

    /// PID file name
    #[arg(short = 'p', long = "pidfile")]
    pub pid_file: Option<PathBuf>,

    /// Chroot to this directory before running
    #[arg(short = 'd', long = "directory")]
    pub directory: Option<PathBuf>,

    /// Run in the foreground (do not daemonize)
    #[arg(short = 'f', long = "foreground", conflicts_with_all = ["cron", "list"])]
    pub foreground: bool,

    /// Perform one cleaning cycle and exit ("cron mode")
    #[arg(short = 'C', long = "cron", conflicts_with = "list")]
    pub cron: bool,

    /// List the currently blocked hosts and exit
    #[arg(short = 'L', long = "list")]
    pub list: bool,

    /// Do not look up host names of listed addresses
    #[arg(short = 'n', long = "noresolve")]
    pub no_resolve: bool,

    /// Increase the logging level (repeat for more)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Decrease the logging level (repeat for less)
    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,
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
