//! # deploypl
//!
//! Control daemon that maintains the health and capability profile of a
//! PlanetLab node fleet.
//!
//! One binary, four commands. `start` daemonizes and drives the probing
//! pipeline (ping, ssh reachability, ssh fingerprint, repair) over the node
//! pool once per period, persisting classifications to an embedded store
//! between stages. `status` reads the same store without touching the
//! running poller. `stop` and `restart` complete the PID-file lifecycle.

mod cli;
mod status;
mod supervisor;

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use deploypl_config::DaemonConfig;
use deploypl_core::{HostResolver, NodeStore, Poller, PollerConfig, Privileges, load_seed};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, Command};
use crate::supervisor::{DEFAULT_PIDFILE, Supervisor};

fn main() -> ExitCode {
    let args = Args::parse();
    match dispatch(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("deploypl: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(args: Args) -> anyhow::Result<ExitCode> {
    let supervisor = Arc::new(Supervisor::new(PathBuf::from(DEFAULT_PIDFILE)));
    match args.command {
        Command::Start => {
            start(&args, &supervisor)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop => {
            supervisor.stop()?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Restart => {
            supervisor.stop()?;
            start(&args, &supervisor)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => status_command(&args, &supervisor),
    }
}

/// Load and resolve the configuration, then detach. Everything after the
/// fork runs in the daemon child and reports through the log file.
fn start(args: &Args, supervisor: &Arc<Supervisor>) -> anyhow::Result<()> {
    let invocation_dir =
        std::env::current_dir().context("cannot determine the invocation directory")?;
    let config = DaemonConfig::load(&args.config)?.resolved(&invocation_dir);

    // Directories must exist before privileges drop and the cwd moves to /.
    fs::create_dir_all(&config.core.data_dir).context("cannot create data_dir")?;
    fs::create_dir_all(&config.core.log_dir).context("cannot create log_dir")?;
    let log_path = config.log_file(&args.log_file);

    let debug = args.debug;
    let worker = Arc::clone(supervisor);
    supervisor.start(&log_path, move || daemon_main(config, debug, worker))?;
    Ok(())
}

/// Daemon-side entry point: runs deprivileged, owns the runtime, and turns
/// every outcome into an exit code.
fn daemon_main(config: DaemonConfig, debug: bool, supervisor: Arc<Supervisor>) -> i32 {
    if let Err(err) = supervisor.drop_privileges() {
        eprintln!("deploypl: {err}");
        return 1;
    }
    init_tracing(debug);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("cannot build the async runtime: {err}");
            return 1;
        }
    };

    match runtime.block_on(poll_until_terminated(config, supervisor)) {
        Ok(()) => {
            info!("terminated by signal");
            0
        }
        Err(err) => {
            error!("fatal: {err:#}");
            1
        }
    }
}

async fn poll_until_terminated(
    config: DaemonConfig,
    supervisor: Arc<Supervisor>,
) -> anyhow::Result<()> {
    let seed = load_seed(&config.seed_file())?;
    let privileges: Arc<dyn Privileges> = supervisor;

    let store = NodeStore::open(&config.store_file(), privileges.as_ref()).await?;
    let resolver = HostResolver::new();
    let poller_config = PollerConfig {
        period: Duration::from_secs(config.core.probing_period),
        initial_delay: config.core.initial_delay,
        thread_limit: config.core.thread_limit,
        ssh_limit: config.core.ssh_limit,
        slice: config.core.slice.clone(),
        user: config.core.user.clone(),
        ssh_keyloc: config.core.ssh_keyloc.clone(),
    };
    let mut poller =
        Poller::bootstrap(poller_config, store, seed, &resolver, privileges).await?;

    info!(
        "deploypl started: slice {}, {}s period",
        config.core.slice, config.core.probing_period
    );

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = poller.run() => Ok(()),
        _ = terminate.recv() => Ok(()),
    }
}

fn status_command(args: &Args, supervisor: &Arc<Supervisor>) -> anyhow::Result<ExitCode> {
    if !supervisor.status()? {
        return Ok(ExitCode::FAILURE);
    }

    // Read-only path: no subscriber is installed, so nothing appends to the
    // daemon's log from here.
    let invocation_dir =
        std::env::current_dir().context("cannot determine the invocation directory")?;
    let config = DaemonConfig::load(&args.config)?.resolved(&invocation_dir);

    let privileges: Arc<dyn Privileges> = supervisor.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(status::render_status(
        &config,
        privileges.as_ref(),
        args.verbose,
        args.names,
    ))?;
    println!("{report}");
    Ok(ExitCode::SUCCESS)
}

fn init_tracing(debug: bool) {
    let default_filter = if debug {
        "deploypl_daemon=debug,deploypl_core=debug"
    } else {
        "deploypl_daemon=info,deploypl_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
