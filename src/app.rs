//! Process lifecycle: arguments, pid file, daemonization.
//!
//! The binary drives these in order: parse arguments, load the config,
//! carry out `-s stop`/`-s restart` against the old process, check and
//! write the pid file, optionally daemonize, then hand control to the
//! server loop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::{Error, Result};

/// What `-s` asked for. `Start` is the default with no `-s` at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Restart,
}

/// Parsed command line.
#[derive(Debug)]
pub struct AppArgs {
    /// Config file path, the single positional argument.
    pub config: Option<PathBuf>,
    /// `-d`, run in the background.
    pub daemonize: bool,
    /// `-s start|stop|restart`.
    pub action: Action,
    pub help: bool,
    pub version: bool,
}

/// Parse the command line. Unknown options turn on help so the caller
/// prints usage and exits instead of starting with a half-understood
/// invocation.
pub fn parse_args(args: &[String]) -> AppArgs {
    let mut parsed = AppArgs {
        config: None,
        daemonize: false,
        action: Action::Start,
        help: false,
        version: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" => {
                parsed.daemonize = true;
            }
            "-s" => {
                i += 1;
                match args.get(i).map(String::as_str) {
                    Some("start") => parsed.action = Action::Start,
                    Some("stop") => parsed.action = Action::Stop,
                    Some("restart") => parsed.action = Action::Restart,
                    _ => {
                        eprintln!("-s expects start, stop or restart");
                        parsed.help = true;
                    }
                }
            }
            "-h" | "--help" => {
                parsed.help = true;
            }
            "-v" | "--version" => {
                parsed.version = true;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {arg}");
                parsed.help = true;
            }
            arg => {
                parsed.config = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    parsed
}

/// Pid recorded in the file, if the file exists and parses.
pub fn read_pidfile(path: &Path) -> Option<i32> {
    let content = fs::read_to_string(path).ok()?;
    content.trim().parse().ok()
}

/// Refuse to start over an existing pid file.
///
/// A stale file from a crashed instance must be removed by hand; silently
/// reusing it would let two servers fight over one port.
pub fn check_pidfile(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(Error::Internal(format!(
            "pidfile {} already exists, is another instance running?",
            path.display()
        )));
    }
    Ok(())
}

/// Record our pid. Called after daemonizing so the file holds the pid
/// that actually serves.
pub fn write_pidfile(path: &Path) -> io::Result<()> {
    fs::write(path, std::process::id().to_string())
}

/// Best-effort removal on the way out.
pub fn remove_pidfile(path: &Path) {
    let _ = fs::remove_file(path);
}

/// True when a process with this pid can receive signals from us.
fn process_exists(pid: i32) -> bool {
    // SAFETY: kill() with signal 0 performs no delivery, it only checks
    // whether the pid is signalable. The return value is checked.
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Stop the instance recorded in the pid file and wait for it to exit.
///
/// Runs before logging is up, so progress goes to the terminal. A pid
/// file naming a dead process is treated as leftover state: the file is
/// removed and the stop succeeds.
pub fn stop_server(pidfile: &Path) -> Result<()> {
    let Some(pid) = read_pidfile(pidfile) else {
        return Err(Error::Internal(format!(
            "could not read pid from {}",
            pidfile.display()
        )));
    };
    if !process_exists(pid) {
        eprintln!("process {pid} already gone, removing stale pidfile");
        remove_pidfile(pidfile);
        return Ok(());
    }
    // SAFETY: kill() is safe to call with any pid. The return value is
    // checked.
    if unsafe { libc::kill(pid, libc::SIGTERM) } == -1 {
        return Err(Error::Io(io::Error::last_os_error()));
    }
    while process_exists(pid) {
        thread::sleep(Duration::from_millis(100));
    }
    remove_pidfile(pidfile);
    println!("sandstone-server stopped, pid {pid}");
    Ok(())
}

/// Detach from the controlling terminal and run in the background.
///
/// Returns in the child; the parent exits here. The child becomes a
/// session leader, moves to `work_dir`, and points the standard fds at
/// `/dev/null`.
#[cfg(unix)]
pub fn daemonize(work_dir: &Path) -> Result<()> {
    // SAFETY: fork() is safe to call; it creates a new process. The
    // return value is checked.
    match unsafe { libc::fork() } {
        -1 => Err(Error::Io(io::Error::last_os_error())),
        0 => {
            // SAFETY: setsid() is safe to call after fork in the child.
            // The return value is checked.
            if unsafe { libc::setsid() } == -1 {
                return Err(Error::Io(io::Error::last_os_error()));
            }

            std::env::set_current_dir(work_dir)?;

            // SAFETY: standard daemonization fd shuffle. close(0/1/2)
            // releases the terminal fds; open() on a valid C string
            // lands on fd 0; dup(0) fills 1 and 2.
            unsafe {
                libc::close(0);
                libc::close(1);
                libc::close(2);

                libc::open(c"/dev/null".as_ptr(), libc::O_RDWR);
                libc::dup(0);
                libc::dup(0);
            }

            Ok(())
        }
        _ => {
            std::process::exit(0);
        }
    }
}
