//! Entry point for the sandstone server binary.

use std::sync::Arc;
use std::thread;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sandstone::app::{self, Action};
use sandstone::server::{Config, NetworkServer};
use sandstone::VERSION;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = app::parse_args(&args);

    if cli.help {
        print_help();
        return Ok(());
    }
    if cli.version {
        println!("sandstone-server {VERSION}");
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error loading {}: {err}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.daemonize {
        config.daemonize = true;
    }
    if let Err(err) = config.validate() {
        eprintln!("refusing to start: {err}");
        std::process::exit(1);
    }

    // -s stop and -s restart act on the already-running instance first
    if cli.action != Action::Start {
        let Some(pidfile) = config.pidfile.clone() else {
            eprintln!("-s stop/restart needs a pidfile directive in the config");
            std::process::exit(1);
        };
        app::stop_server(&pidfile)?;
        if cli.action == Action::Stop {
            return Ok(());
        }
    }

    if let Some(pidfile) = &config.pidfile {
        if let Err(err) = app::check_pidfile(pidfile) {
            eprintln!("{err}");
            std::process::exit(1);
        }
    }

    #[cfg(unix)]
    if config.daemonize {
        app::daemonize(&config.work_dir)?;
    }

    // after daemonize, so the file records the pid that actually serves
    if let Some(pidfile) = &config.pidfile {
        if let Err(err) = app::write_pidfile(pidfile) {
            eprintln!("could not write pidfile: {err}");
            std::process::exit(1);
        }
    }

    init_logging(&config)?;

    if !config.daemonize {
        println!(
            "sandstone-server {VERSION}, pid {}, listening on {}",
            std::process::id(),
            config.listen_addr()
        );
    }
    info!("sandstone {} starting on {}", VERSION, config.listen_addr());

    let pidfile = config.pidfile.clone();
    let mut server = NetworkServer::new(config)?;

    let handle = server.shutdown_handle();
    let mut signals = Signals::new([SIGINT, SIGTERM])?;
    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!(signal, "shutdown signal received");
                handle.shutdown();
            }
        })?;

    let result = server.run();

    if let Some(pidfile) = &pidfile {
        app::remove_pidfile(pidfile);
    }
    Ok(result?)
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.loglevel.as_filter()));

    if let Some(logfile) = &config.logfile {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(logfile)?;

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_ansi(false)
            .with_writer(Arc::new(file))
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .init();
    }

    Ok(())
}

fn print_help() {
    println!(
        r"sandstone-server {VERSION} - embedded-storage key/value server

USAGE:
    sandstone-server [-d] <config> [-s start|stop|restart]

OPTIONS:
    -d               Run as a daemon (background)
    -s <action>      start, stop or restart the instance named by the
                     config's pidfile directive
    -h, --help       Print this help message
    -v, --version    Print version information

CONFIGURATION FILE:
    One directive per line, '#' starts a comment, values may be quoted.
    See sandstone.conf for a commented sample.

EXAMPLES:
    sandstone-server sandstone.conf            Start in the foreground
    sandstone-server -d sandstone.conf         Start as a daemon
    sandstone-server sandstone.conf -s stop    Stop the running daemon

SIGNALS:
    SIGINT/SIGTERM   Graceful shutdown
"
    );
}
