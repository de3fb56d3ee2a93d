//! Process-wide diagnostics sink.

use std::io::{self, IsTerminal};

use tracing_subscriber::filter::LevelFilter;

pub const DEFAULT_VERBOSITY: i32 = 2;

/// Effective verbosity from the counted -q / -V (or -v) flags.
pub fn verbosity(quiet: u8, verbose: u8) -> i32 {
    DEFAULT_VERBOSITY + i32::from(verbose) - i32::from(quiet)
}

/// Install the global subscriber.
///
/// Verbosity 1 keeps warnings and notices about denials and errors, 2 adds
/// successful blocks and table mutations, 3 adds watch-list churn and every
/// pattern hit. ANSI colour and timestamps only when stderr is a terminal.
pub fn init(verbosity: i32) {
    let level = match verbosity {
        v if v <= 0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let builder = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false);
    if io::stderr().is_terminal() {
        builder.init();
    } else {
        builder.with_ansi(false).without_time().init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_verbosity_shows_info() {
        assert_eq!(verbosity(0, 0), 2);
    }

    #[test]
    fn quiet_and_verbose_cancel_out() {
        assert_eq!(verbosity(2, 2), 2);
        assert_eq!(verbosity(3, 0), -1);
        assert_eq!(verbosity(0, 2), 4);
    }
}
