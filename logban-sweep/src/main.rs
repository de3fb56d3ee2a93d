use std::fs;
use std::path::Path;
use std::process;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, after, select};
use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use logban_lib::fw::BanTable;
use logban_lib::fw::nft::NftBackend;
use logban_lib::local::LocalAddrs;
use logban_lib::resolver::{self, SystemResolver};
use logban_lib::{logging, privileges, state};

mod cli;

// Avoid musl's default allocator due to degraded performance
// https://nickb.dev/blog/default-musl-allocator-considered-harmful-to-performance
#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Delete every entry whose stored expiry has passed. Errors are logged and
/// do not stop the sweep.
fn sweep(fw: &mut dyn BanTable, tables: &[u16], now: u64) -> exitcode::ExitCode {
    let mut code = exitcode::OK;
    for &table in tables {
        let entries = match fw.entries(table) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(table, error = %e, "failed to list ban table");
                code = exitcode::SOFTWARE;
                continue;
            }
        };
        for entry in entries {
            if entry.value != 0 && u64::from(entry.value) < now {
                match fw.del(entry.addr, table) {
                    Ok(()) => {
                        tracing::info!(addr = %entry.addr, table, "removed expired entry");
                    }
                    Err(e) => {
                        tracing::warn!(addr = %entry.addr, table, error = %e, "error removing expired entry");
                    }
                }
            }
        }
    }
    code
}

// "never" for permanent entries, "expired" once the time has passed,
// otherwise the remaining duration.
fn expires_in(value: u32, now: u64) -> String {
    if value == 0 {
        "never".to_string()
    } else if u64::from(value) < now {
        "expired".to_string()
    } else {
        humantime::format_duration(Duration::from_secs(u64::from(value) - now)).to_string()
    }
}

fn list_tables(fw: &mut dyn BanTable, tables: &[u16], resolve: bool) -> exitcode::ExitCode {
    let mut code = exitcode::OK;
    let now = unix_now();
    for &table in tables {
        println!("ENTRIES IN BAN TABLE {table}");
        println!("=================================================");
        println!("address\t\texpires in\t\thost name");
        match fw.entries(table) {
            Ok(entries) => {
                for entry in entries {
                    let hostname = if resolve {
                        resolver::reverse(&entry.addr)
                    } else {
                        None
                    };
                    println!(
                        "{}\t{}\t\t{}",
                        entry.addr,
                        expires_in(entry.value, now),
                        hostname.as_deref().unwrap_or("---")
                    );
                }
            }
            Err(e) => {
                tracing::warn!(table, error = %e, "failed to list ban table");
                code = exitcode::SOFTWARE;
            }
        }
        println!();
    }
    code
}

// A pid file from a previous run only blocks startup while its process is
// still alive.
fn live_pid(path: &Path) -> Option<i32> {
    let content = fs::read_to_string(path).ok()?;
    let pid = content.trim().parse::<i32>().ok()?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).ok()?;
    Some(pid)
}

fn signal_channel() -> Result<Receiver<i32>, exitcode::ExitCode> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGUSR1]).map_err(|e| {
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

fn clean_cycle(fw: &mut dyn BanTable, args: &cli::Cli) -> exitcode::ExitCode {
    if let Some(pid_file) = &args.pid_file
        && let Some(pid) = live_pid(pid_file)
    {
        tracing::error!(pid, "another instance is already running");
        return exitcode::UNAVAILABLE;
    }

    if let Some(dir) = &args.directory {
        privileges::chroot(dir);
    }

    if !args.foreground
        && let Err(e) = nix::unistd::daemon(false, false)
    {
        tracing::error!(error = %e, "failed to become a daemon");
        return exitcode::OSERR;
    }

    // record our pid only after detaching
    if let Some(pid_file) = &args.pid_file
        && let Err(e) = fs::write(pid_file, format!("{}\n", process::id()))
    {
        tracing::warn!(pid_file = %pid_file.display(), error = %e, "cannot write pid file");
    }

    let signals = match signal_channel() {
        Ok(receiver) => receiver,
        Err(code) => return code,
    };

    let resolver = SystemResolver;
    let mut local = LocalAddrs::new();
    if let Some(state_file) = &args.state_file
        && let Err(e) = state::load(fw, &resolver, &mut local, state_file)
    {
        tracing::error!(state_file = %state_file.display(), error = %e, "not restoring state");
    }

    let interval = Duration::from_secs(args.sleep);
    loop {
        sweep(fw, &args.tables, unix_now());
        select! {
            recv(signals) -> signal => match signal {
                Ok(SIGUSR1) => {
                    list_tables(fw, &args.tables, !args.no_resolve);
                }
                _ => break,
            },
            recv(after(interval)) -> _ => {}
        }
    }

    if let Some(state_file) = &args.state_file
        && let Err(e) = state::save(fw, &args.tables, state_file)
    {
        tracing::warn!(state_file = %state_file.display(), error = %e, "failed to save state");
    }
    if let Some(pid_file) = &args.pid_file {
        let _ = fs::remove_file(pid_file);
    }

    exitcode::OK
}

fn main() {
    let args = cli::parse();

    logging::init(logging::verbosity(args.quiet, args.verbose));

    if !privileges::is_root() {
        tracing::error!("{} has to be run as root", env!("CARGO_PKG_NAME"));
        process::exit(exitcode::OSERR);
    }

    let mut fw = NftBackend::new();
    if let Err(e) = fw.open(&args.tables) {
        tracing::error!(error = %e, "failed to open ban tables");
        process::exit(exitcode::OSERR);
    }

    let code = if args.list {
        list_tables(&mut fw, &args.tables, !args.no_resolve)
    } else if args.cron {
        sweep(&mut fw, &args.tables, unix_now())
    } else {
        clean_cycle(&mut fw, &args)
    };

    fw.close();
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use logban_lib::fw::memory::MemoryBackend;
    use std::net::IpAddr;

    fn addr(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn sweep_removes_only_expired_entries() -> anyhow::Result<()> {
        let mut fw = MemoryBackend::new();
        fw.add(addr("192.0.2.1"), 500, 1)?;
        fw.add(addr("192.0.2.2"), 2_000, 1)?;
        fw.add(addr("2001:db8::1"), 999, 1)?;

        sweep(&mut fw, &[1], 1_000);
        assert_eq!(fw.value(1, addr("192.0.2.1")), None);
        assert_eq!(fw.value(1, addr("192.0.2.2")), Some(2_000));
        assert_eq!(fw.value(1, addr("2001:db8::1")), None);

        Ok(())
    }

    #[test]
    fn sweep_never_removes_permanent_entries() -> anyhow::Result<()> {
        let mut fw = MemoryBackend::new();
        fw.add(addr("192.0.2.1"), 0, 1)?;
        sweep(&mut fw, &[1], u32::MAX as u64 + 1);
        assert_eq!(fw.value(1, addr("192.0.2.1")), Some(0));

        Ok(())
    }

    #[test]
    fn sweep_only_touches_watched_tables() -> anyhow::Result<()> {
        let mut fw = MemoryBackend::new();
        fw.add(addr("192.0.2.1"), 10, 1)?;
        fw.add(addr("192.0.2.1"), 10, 2)?;
        sweep(&mut fw, &[1], 100);
        assert_eq!(fw.value(1, addr("192.0.2.1")), None);
        assert_eq!(fw.value(2, addr("192.0.2.1")), Some(10));

        Ok(())
    }

    #[test]
    fn entries_on_the_expiry_edge_survive_until_the_next_second() -> anyhow::Result<()> {
        let mut fw = MemoryBackend::new();
        fw.add(addr("192.0.2.1"), 1_000, 1)?;
        sweep(&mut fw, &[1], 1_000);
        assert_eq!(fw.value(1, addr("192.0.2.1")), Some(1_000));
        sweep(&mut fw, &[1], 1_001);
        assert_eq!(fw.value(1, addr("192.0.2.1")), None);

        Ok(())
    }

    #[test]
    fn renders_expiry_states() {
        assert_eq!(expires_in(0, 1_000), "never");
        assert_eq!(expires_in(999, 1_000), "expired");
        assert_eq!(expires_in(1_090, 1_000), "1m 30s");
    }

    #[test]
    fn missing_pid_file_blocks_nothing() {
        assert_eq!(live_pid(Path::new("/nonexistent/logban-sweep.pid")), None);
    }
}
