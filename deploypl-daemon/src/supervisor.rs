use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use deploypl_core::{DeployError, Privileges};
use nix::sys::signal::{Signal, kill};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{
    ForkResult, Pid, Uid, chdir, dup2_stderr, dup2_stdin, dup2_stdout, fork, getpid, seteuid,
    setsid,
};
use thiserror::Error;
use tracing::error;

/// Default PID-file location.
pub const DEFAULT_PIDFILE: &str = "/var/run/deploypl.pid";

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("pid file {pidfile} names live process {pid}, daemon already running")]
    AlreadyRunning { pidfile: PathBuf, pid: Pid },

    #[error("daemon is not running: {0}")]
    NotRunning(String),

    #[error("fork failed: {0}")]
    Fork(nix::Error),

    #[error("daemonization failed: {0}")]
    Daemonize(nix::Error),

    #[error("signal delivery failed: {0}")]
    Signal(nix::Error),

    #[error("privilege transition failed: {0}")]
    Privilege(nix::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Single-instance daemon lifecycle: PID-file discipline, double-fork
/// detachment, and the effective-uid transitions wrapped around store
/// sessions.
///
/// The supervisor is the only component that mutates the process-wide
/// effective uid or touches the PID-file; everything else treats both as
/// read-only.
#[derive(Debug)]
pub struct Supervisor {
    pidfile: PathBuf,
    /// Uid of the operator who invoked us through sudo; long-running work
    /// runs as them, store sessions re-elevate.
    invoker: Uid,
    /// Whether we were launched with root privileges at all. Unprivileged
    /// runs keep working against world-readable store locations.
    privileged: bool,
}

impl Supervisor {
    pub fn new(pidfile: PathBuf) -> Self {
        Supervisor {
            pidfile,
            invoker: invoking_uid(),
            privileged: Uid::effective().is_root(),
        }
    }

    /// Refuse to double-start, then daemonize and hand control to `run`.
    /// Returns only on failure before the fork; otherwise the process exits
    /// with `run`'s code after removing the PID-file.
    pub fn start(&self, log_path: &Path, run: impl FnOnce() -> i32) -> Result<(), SupervisorError> {
        if let Some(pid) = self.read_pid() {
            if is_alive(pid) {
                return Err(SupervisorError::AlreadyRunning {
                    pidfile: self.pidfile.clone(),
                    pid,
                });
            }
            // Stale file from an unclean shutdown; overwritten below.
        }

        self.daemonize(log_path)?;
        let code = run();
        self.delpid();
        process::exit(code);
    }

    /// Terminate the running daemon and reap its PID-file.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let pid = self.read_pid().ok_or_else(|| {
            SupervisorError::NotRunning(format!("no pid file at {}", self.pidfile.display()))
        })?;

        kill(pid, Signal::SIGTERM).map_err(SupervisorError::Signal)?;
        std::thread::sleep(Duration::from_secs(1));

        if self.pidfile.exists() {
            fs::remove_file(&self.pidfile)?;
        }
        Ok(())
    }

    /// Report liveness to standard output. True iff the PID-file names a
    /// live process. Never touches the poller.
    pub fn status(&self) -> Result<bool, SupervisorError> {
        match self.read_pid() {
            None => {
                eprintln!("there is no pid file at {}", self.pidfile.display());
                Ok(false)
            }
            Some(pid) if is_alive(pid) => {
                println!("deploypl is running with pid {pid}");
                Ok(true)
            }
            Some(pid) => {
                println!("there is no process with pid {pid}");
                Ok(false)
            }
        }
    }

    /// PID recorded in the PID-file, if the file exists and parses.
    pub fn read_pid(&self) -> Option<Pid> {
        let raw = fs::read_to_string(&self.pidfile).ok()?;
        let pid = raw.trim().parse::<i32>().ok()?;
        Some(Pid::from_raw(pid))
    }

    /// Re-elevate the effective uid to root. Only possible because the real
    /// uid is root for the daemon's whole lifetime.
    pub fn root(&self) -> Result<(), SupervisorError> {
        if !self.privileged {
            return Ok(());
        }
        seteuid(Uid::from_raw(0)).map_err(SupervisorError::Privilege)
    }

    /// Lower the effective uid back to the invoking operator.
    pub fn drop_privileges(&self) -> Result<(), SupervisorError> {
        if !self.privileged {
            return Ok(());
        }
        seteuid(self.invoker).map_err(SupervisorError::Privilege)
    }

    /// Detach from the controlling terminal: double-fork, new session,
    /// root working directory, clean umask, PID-file, redirected standard
    /// streams.
    fn daemonize(&self, log_path: &Path) -> Result<(), SupervisorError> {
        match unsafe { fork() }.map_err(SupervisorError::Fork)? {
            ForkResult::Parent { .. } => process::exit(0),
            ForkResult::Child => {}
        }

        chdir("/").map_err(SupervisorError::Daemonize)?;
        setsid().map_err(SupervisorError::Daemonize)?;
        umask(Mode::empty());

        match unsafe { fork() }.map_err(SupervisorError::Fork)? {
            ForkResult::Parent { .. } => process::exit(0),
            ForkResult::Child => {}
        }

        fs::write(&self.pidfile, format!("{}\n", getpid()))?;
        self.redirect_streams(log_path)?;
        Ok(())
    }

    /// stdin from /dev/null, stdout and stderr appended to the log file.
    /// Child subprocesses inherit nothing else.
    fn redirect_streams(&self, log_path: &Path) -> Result<(), SupervisorError> {
        let devnull = fs::File::open("/dev/null")?;
        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        dup2_stdin(&devnull).map_err(SupervisorError::Daemonize)?;
        dup2_stdout(&log).map_err(SupervisorError::Daemonize)?;
        dup2_stderr(&log).map_err(SupervisorError::Daemonize)?;
        Ok(())
    }

    /// Remove the PID-file. Runs as root: the file lives in /var/run and
    /// the daemon spends its life deprivileged.
    fn delpid(&self) {
        if let Err(err) = self.root() {
            error!("cannot re-elevate to remove the pid file: {err}");
        }
        if let Err(err) = fs::remove_file(&self.pidfile) {
            error!(
                "cannot remove pid file {}: {err}",
                self.pidfile.display()
            );
        }
    }
}

impl Privileges for Supervisor {
    fn raise(&self) -> deploypl_core::Result<()> {
        self.root()
            .map_err(|err| DeployError::Privilege(err.to_string()))
    }

    fn restore(&self) -> deploypl_core::Result<()> {
        self.drop_privileges()
            .map_err(|err| DeployError::Privilege(err.to_string()))
    }
}

fn invoking_uid() -> Uid {
    std::env::var("SUDO_UID")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(Uid::from_raw)
        .unwrap_or_else(nix::unistd::getuid)
}

fn is_alive(pid: Pid) -> bool {
    Path::new(&format!("/proc/{pid}/status")).is_file()
}
