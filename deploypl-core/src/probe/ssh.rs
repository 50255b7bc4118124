use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use deploypl_model::NodeState;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::run_bounded;
use crate::pool::{NodePool, StateFilter};

/// Default timeout for a reachability probe command.
pub const SSH_TIMEOUT: Duration = Duration::from_secs(10);
/// Attempts per host before the stage gives up for this cycle.
pub const SSH_RETRIES: u32 = 3;

/// Outcome of one remote command on one host.
#[derive(Debug, Clone)]
pub struct SshOutput {
    pub host: String,
    /// Exit status of the remote command; absent when the connection could
    /// not be established or the command timed out.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl SshOutput {
    fn failed(host: String) -> Self {
        SshOutput {
            host,
            status: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

/// Runs one command across many hosts under the slice login, with bounded
/// fan-out and a per-host retry budget.
#[derive(Debug, Clone)]
pub struct SshRunner {
    slice: String,
    keyloc: PathBuf,
    limit: usize,
    retries: u32,
}

impl SshRunner {
    pub fn new(slice: String, keyloc: PathBuf, limit: usize) -> Self {
        SshRunner {
            slice,
            keyloc,
            limit,
            retries: SSH_RETRIES,
        }
    }

    pub fn slice(&self) -> &str {
        &self.slice
    }

    /// Run `cmdline` on every host. Output order matches completion, not
    /// input; consumers match on [`SshOutput::host`].
    pub async fn run(
        &self,
        hosts: &[String],
        cmdline: &str,
        limit_time: Duration,
        sudo: bool,
    ) -> Vec<SshOutput> {
        let command = if sudo {
            format!("sudo -S {cmdline}")
        } else {
            cmdline.to_string()
        };
        run_bounded(hosts.to_vec(), self.limit, |host| {
            let command = command.clone();
            async move { self.run_one(host, &command, limit_time).await }
        })
        .await
    }

    async fn run_one(&self, host: String, cmdline: &str, limit_time: Duration) -> SshOutput {
        let mut last = SshOutput::failed(host.clone());
        for attempt in 1..=self.retries.max(1) {
            last = self.attempt(&host, cmdline, limit_time).await;
            if last.status.is_some() {
                break;
            }
            debug!("ssh attempt {attempt} to {host} failed");
        }
        last
    }

    async fn attempt(&self, host: &str, cmdline: &str, limit_time: Duration) -> SshOutput {
        let mut command = Command::new("ssh");
        command
            .arg(host)
            .args(["-o", "NumberOfPasswordPrompts=1"])
            .args(["-o", "StrictHostKeyChecking=no"])
            .arg("-i")
            .arg(&self.keyloc)
            .args(["-l", &self.slice])
            .arg(cmdline)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match timeout(limit_time, command.output()).await {
            Ok(Ok(output)) => SshOutput {
                host: host.to_string(),
                status: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
            Ok(Err(err)) => {
                debug!("ssh to {host} could not spawn: {err}");
                SshOutput::failed(host.to_string())
            }
            Err(_) => {
                debug!("ssh to {host} timed out after {limit_time:?}");
                SshOutput::failed(host.to_string())
            }
        }
    }
}

/// Apply reachability-probe outcomes: a zero exit status proves an ssh
/// session establishes, so the node rises to accessible. Anything else
/// leaves the node where it was; the next cycle retries.
pub fn apply_ssh_outputs(pool: &mut NodePool, outputs: &[SshOutput]) {
    for output in outputs {
        if output.status == Some(0) {
            pool.raise_state_by_addr(&output.host, NodeState::Accessible);
        }
    }
}

/// Probe every reachable node for an ssh session by creating the user's
/// working directory remotely.
pub async fn ssh_stage(pool: &mut NodePool, runner: &SshRunner, user: &str) {
    let hosts = pool.addrs(StateFilter::AtLeast(NodeState::Reachable));
    if hosts.is_empty() {
        debug!("no reachable node found, skipping ssh probe");
        return;
    }

    debug!(
        "ssh probing {} nodes via slice {} ...",
        hosts.len(),
        runner.slice()
    );
    let outputs = runner
        .run(&hosts, &format!("mkdir -p {user}"), SSH_TIMEOUT, false)
        .await;
    apply_ssh_outputs(pool, &outputs);
    debug!("ssh probing completed");
}
