use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Default configuration file location; `start` requires the file to exist,
/// the read paths only use it to find the store.
pub const DEFAULT_CONFIG: &str = "/etc/deploypl.ini";

/// Command line arguments for the deploypl daemon.
#[derive(Parser, Debug)]
#[command(name = "deploypl")]
#[command(about = "PlanetLab fleet health poller")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file location.
    #[arg(short, long, value_name = "PATH", default_value = DEFAULT_CONFIG, global = true)]
    pub config: PathBuf,

    /// Log file basename inside the configured log directory.
    #[arg(short, long, value_name = "NAME", default_value = "deploypl.log", global = true)]
    pub log_file: String,

    /// Increase log output level.
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Status verbosity: -v histograms over usable nodes, -vv over all.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Print node names rather than addresses.
    #[arg(short, long, global = true)]
    pub names: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Daemonize and run the probing loop.
    Start,
    /// Terminate the running daemon.
    Stop,
    /// Stop then start.
    Restart,
    /// Report daemon liveness and the current pool aggregates.
    Status,
}
