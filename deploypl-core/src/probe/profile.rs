use std::time::Duration;

use deploypl_model::{NodeProfile, NodeState};
use tracing::debug;

use super::ssh::{SshOutput, SshRunner};
use crate::pool::{NodePool, StateFilter};

/// Timeout for the fingerprint command.
pub const PROFILE_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for the package-manager check; yum can be very slow on a node
/// with a broken mirror list.
pub const REPAIR_TIMEOUT: Duration = Duration::from_secs(120);
/// Baseline package whose installability proves the package manager works.
pub const REPAIR_PACKAGE: &str = "python";

const MAGIC: &str = "magic";
const VSYS_MARKER: &str = "fd_tuntap.control";

/// Composite fingerprint command: a sentinel, the kernel, the distribution,
/// and the vsys control directory listing, one line each.
pub const PROFILE_COMMAND: &str =
    "echo 'magic'; uname -sr; cat /etc/*-release | head -n 1; sudo -S ls /vsys/;";

/// Parse the output of [`PROFILE_COMMAND`].
///
/// The first line must carry the sentinel, otherwise the output belongs to
/// some login banner or error text and the whole response is discarded.
/// The vsys line is optional; a node without `/vsys/` simply has no
/// capability flag.
pub fn parse_profile(stdout: &str) -> Option<NodeProfile> {
    let mut lines = stdout.lines();
    if !lines.next()?.contains(MAGIC) {
        return None;
    }
    let kernel = lines.next()?.trim().to_string();
    let os = lines.next()?.trim().to_string();
    let vsys = lines.next().is_some_and(|line| line.contains(VSYS_MARKER));
    Some(NodeProfile { kernel, os, vsys })
}

/// Apply fingerprint outcomes: a parseable response records the profile and
/// elevates the node to usable; anything else leaves the node and its
/// attributes untouched.
pub fn apply_profile_outputs(pool: &mut NodePool, outputs: &[SshOutput]) {
    for output in outputs {
        if output.status.is_none() {
            continue;
        }
        match parse_profile(&output.stdout) {
            Some(profile) => {
                pool.apply_profile_by_addr(&output.host, &profile);
                pool.raise_state_by_addr(&output.host, NodeState::Usable);
            }
            None => debug!("unusable fingerprint from {}", output.host),
        }
    }
}

/// Apply repair outcomes: a failed baseline install demotes the node back
/// to accessible. Success changes nothing.
pub fn apply_repair_outputs(pool: &mut NodePool, outputs: &[SshOutput]) {
    for output in outputs {
        if output.status != Some(0) {
            if let Some(node) = pool.node_by_addr(&output.host) {
                debug!(
                    "package manager check failed on {node}: status {:?}, stderr {:?}",
                    output.status, output.stderr
                );
            }
            pool.demote_state_by_addr(&output.host, NodeState::Accessible);
        }
    }
}

/// Fingerprint every ssh-accessible node, then verify the package manager
/// on the usable subset. The repair step is best-effort: one node's broken
/// repository must not fail the cycle.
pub async fn profile_stage(pool: &mut NodePool, runner: &SshRunner) {
    let hosts = pool.addrs(StateFilter::AtLeast(NodeState::Accessible));
    if hosts.is_empty() {
        debug!("no accessible node found, skipping profiling");
        return;
    }

    debug!("profiling {} ssh-accessible nodes", hosts.len());
    let outputs = runner
        .run(&hosts, PROFILE_COMMAND, PROFILE_TIMEOUT, false)
        .await;
    apply_profile_outputs(pool, &outputs);

    repair_step(pool, runner).await;
    debug!("node profiling completed");
}

async fn repair_step(pool: &mut NodePool, runner: &SshRunner) {
    let hosts = pool.addrs(StateFilter::AtLeast(NodeState::Usable));
    if hosts.is_empty() {
        debug!("no usable node found, skipping repair");
        return;
    }

    debug!("checking the package manager on {} nodes", hosts.len());
    let cmdline = format!("yum install -y --nogpgcheck {REPAIR_PACKAGE}");
    let outputs = runner.run(&hosts, &cmdline, REPAIR_TIMEOUT, true).await;
    apply_repair_outputs(pool, &outputs);
}
