use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, select};
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use logban_lib::fw::BanTable;
use logban_lib::fw::nft::NftBackend;
use logban_lib::resolver::SystemResolver;
use logban_lib::{logging, privileges};

mod cli;
mod config;
mod engine;
mod group;
mod pattern;
mod watch;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

enum Outcome {
    Reload,
    Exit(exitcode::ExitCode),
}

fn signal_channel() -> Result<Receiver<i32>, exitcode::ExitCode> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGUSR1]).map_err(|e| {
        tracing::error!(error = %e, "failed to install signal handlers");
        exitcode::OSERR
    })?;
    let (sender, receiver) = crossbeam_channel::bounded(8);
    thread::spawn(move || {
        for signal in signals.forever() {
            if sender.send(signal).is_err() {
                break;
            }
        }
    });
    Ok(receiver)
}

// Reads byte lines off stdin and hands them to the select loop. Lines may be
// arbitrarily long and need not be valid UTF-8.
fn line_channel() -> Receiver<String> {
    let (sender, receiver) = crossbeam_channel::bounded(64);
    thread::spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match stdin.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    if buf.last() == Some(&b'\n') {
                        buf.pop();
                    }
                    let line = String::from_utf8_lossy(&buf).into_owned();
                    if sender.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error reading log stream");
                    break;
                }
            }
        }
    });
    receiver
}

fn load_groups(args: &cli::Cli) -> Result<Vec<group::Group>, exitcode::ExitCode> {
    let files: Vec<PathBuf> = if args.files.is_empty() {
        vec![PathBuf::from(config::DEFAULT_PATH)]
    } else {
        args.files.clone()
    };

    let mut groups = Vec::new();
    for file in &files {
        match config::read_file(file, &mut groups) {
            Ok(issues) if issues.is_empty() => {}
            Ok(issues) => {
                for issue in &issues {
                    tracing::error!("{issue}");
                }
                tracing::error!(file = %file.display(), "invalid configuration");
                return Err(exitcode::CONFIG);
            }
            Err(e) => {
                tracing::error!(file = %file.display(), error = %e, "cannot open configuration file");
                return Err(exitcode::CONFIG);
            }
        }
    }

    if groups.iter().all(|group| group.patterns.is_empty()) {
        tracing::error!("no regular expression patterns configured for matching");
        return Err(exitcode::CONFIG);
    }
    Ok(groups)
}

fn run(args: &cli::Cli, lines: &Receiver<String>, signals: &Receiver<i32>) -> Outcome {
    // fresh configuration on every (re)start
    let groups = match load_groups(args) {
        Ok(groups) => groups,
        Err(code) => return Outcome::Exit(code),
    };
    if args.check {
        tracing::info!(groups = groups.len(), "configuration ok");
        return Outcome::Exit(exitcode::OK);
    }

    // resolve drop targets while /etc is still reachable
    let uid = match args.user.as_deref().map(privileges::lookup_user).transpose() {
        Ok(uid) => uid,
        Err(e) => {
            tracing::error!(error = %e, "cannot drop privileges");
            return Outcome::Exit(exitcode::CONFIG);
        }
    };
    let gid = match args.group.as_deref().map(privileges::lookup_group).transpose() {
        Ok(gid) => gid,
        Err(e) => {
            tracing::error!(error = %e, "cannot drop privileges");
            return Outcome::Exit(exitcode::CONFIG);
        }
    };

    let mut fw = NftBackend::new();
    if let Err(e) = fw.open(&group::tables(&groups)) {
        tracing::error!(error = %e, "failed to open ban tables");
        return Outcome::Exit(exitcode::OSERR);
    }

    if let Some(dir) = &args.directory {
        privileges::chroot(dir);
    }
    privileges::drop_privileges(uid, gid);

    let mut engine = engine::Engine::new(groups, Box::new(fw), Box::new(SystemResolver));
    engine.refresh_local_interfaces();

    tracing::info!("entering main loop");
    let outcome = loop {
        select! {
            recv(signals) -> signal => match signal {
                Ok(SIGHUP) => break Outcome::Reload,
                Ok(SIGUSR1) => eprint!("{}", engine.status_dump(unix_now())),
                _ => break Outcome::Exit(exitcode::OK),
            },
            recv(lines) -> line => match line {
                Ok(line) => engine.process_line(&line, unix_now()),
                // EOF on the log stream
                Err(_) => break Outcome::Exit(exitcode::OK),
            },
        }
    };
    engine.close();
    outcome
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn print_version() {
    let defaults = group::Group::default();
    eprintln!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    eprintln!();
    eprintln!("Built with Rust regular expressions (case-insensitive).");
    eprintln!("IPv4 and IPv6 bans via nftables address maps.");
    eprintln!();
    eprintln!("Default config file: {}", config::DEFAULT_PATH);
    eprintln!("Default logging level: {}", logging::DEFAULT_VERBOSITY);
    eprintln!("Default blocking settings:");
    eprintln!("\ttable = {}", defaults.table);
    eprintln!("\tcount = {}", defaults.max_count);
    eprintln!("\twithin = {} seconds", defaults.within_time);
    eprintln!("\treset = {} seconds", defaults.reset_time);
    eprintln!("\trandom = {} %", defaults.random);
    eprintln!("\tonfail = {}", defaults.flags.onfail_value());
    eprintln!("\twarnfail = {}", group::yes_no(defaults.flags.warnfail));
    eprintln!("\tcontinue = {}", defaults.flags.continue_value());
    eprintln!("\tmaxhosts = {}", defaults.max_hosts);
    eprintln!("\tonmax = {}", defaults.flags.onmax_value());
    eprintln!("\twarnmax = {}", group::yes_no(defaults.flags.warnmax));
    eprintln!("\tblocklocal = {}", group::yes_no(defaults.flags.blocklocal));
}

fn main() {
    let args = cli::parse();

    logging::init(logging::verbosity(args.quiet, args.verbose));

    if args.version {
        print_version();
        process::exit(exitcode::USAGE);
    }

    if !privileges::is_root() {
        tracing::error!("{} has to be run as root", env!("CARGO_PKG_NAME"));
        process::exit(exitcode::OSERR);
    }

    let signals = match signal_channel() {
        Ok(receiver) => receiver,
        Err(code) => process::exit(code),
    };
    let lines = line_channel();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    loop {
        match run(&args, &lines, &signals) {
            Outcome::Reload => {
                tracing::info!("reload requested, re-reading configuration");
            }
            Outcome::Exit(code) => process::exit(code),
        }
    }
}
