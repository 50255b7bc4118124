use std::process::Stdio;
use std::sync::LazyLock;

use deploypl_model::NodeState;
use regex::Regex;
use tokio::process::Command;
use tracing::debug;

use super::run_bounded;
use crate::pool::NodePool;

/// Seconds before `ping` gives up on a target.
pub const PING_DEADLINE_SECS: u32 = 5;
const PING_COUNT: u32 = 1;

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\d+) packets transmitted, (\d+) received,(?: \+\d+ errors,)? (\d+)(?:\.\d+)?% packet loss",
    )
    .expect("ping summary pattern compiles")
});

/// Counters from ping's summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingStats {
    pub sent: u32,
    pub received: u32,
    pub loss_pct: u32,
}

/// Parse the summary line of `ping -q` output. Anything that does not look
/// like a ping report yields `None`.
pub fn parse_ping(output: &str) -> Option<PingStats> {
    let captures = SUMMARY.captures(output)?;
    Some(PingStats {
        sent: captures[1].parse().ok()?,
        received: captures[2].parse().ok()?,
        loss_pct: captures[3].parse().ok()?,
    })
}

/// Decide a node's new classification from one ping attempt. An echo reply
/// raises the node to at least reachable; no reply, a spawn failure, or
/// unparseable output all mean unreachable. The next cycle is the retry.
pub fn classify_ping(previous: NodeState, stats: Option<PingStats>) -> NodeState {
    match stats {
        Some(stats) if stats.received > 0 => previous.max(NodeState::Reachable),
        _ => NodeState::Unreachable,
    }
}

/// Ping every node in the pool with bounded fan-out and write the verdicts
/// back positionally. Nodes without an address never spawn a subprocess.
pub async fn ping_stage(pool: &mut NodePool, limit: usize) {
    debug!("pinging {} nodes ...", pool.len());

    let previous = pool.states();
    let stats = run_bounded(pool.probe_targets(), limit, |target| async move {
        match target {
            Some(addr) => ping(&addr).await,
            None => None,
        }
    })
    .await;

    let states = previous
        .into_iter()
        .zip(stats)
        .map(|(previous, stats)| classify_ping(previous, stats))
        .collect();
    pool.set_states(states);
    debug!("ping completed");
}

async fn ping(addr: &str) -> Option<PingStats> {
    let output = Command::new("ping")
        .arg("-q")
        .args(["-c", &PING_COUNT.to_string()])
        .args(["-w", &PING_DEADLINE_SECS.to_string()])
        .arg(addr)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .ok()?;
    parse_ping(&String::from_utf8_lossy(&output.stdout))
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "\
PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.

--- 192.0.2.1 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 0.045/0.045/0.045/0.000 ms
";

    const NO_REPLY: &str = "\
PING 192.0.2.2 (192.0.2.2) 56(84) bytes of data.

--- 192.0.2.2 ping statistics ---
1 packets transmitted, 0 received, 100% packet loss, time 0ms
";

    const ERRORS: &str = "\
PING 192.0.2.3 (192.0.2.3) 56(84) bytes of data.

--- 192.0.2.3 ping statistics ---
1 packets transmitted, 0 received, +1 errors, 100% packet loss, time 0ms
";

    #[test]
    fn summary_line_parses() {
        assert_eq!(
            parse_ping(REPLY),
            Some(PingStats {
                sent: 1,
                received: 1,
                loss_pct: 0
            })
        );
        assert_eq!(
            parse_ping(NO_REPLY),
            Some(PingStats {
                sent: 1,
                received: 0,
                loss_pct: 100
            })
        );
    }

    #[test]
    fn error_counters_do_not_break_the_parse() {
        assert_eq!(
            parse_ping(ERRORS),
            Some(PingStats {
                sent: 1,
                received: 0,
                loss_pct: 100
            })
        );
    }

    #[test]
    fn garbage_does_not_parse() {
        assert_eq!(parse_ping(""), None);
        assert_eq!(parse_ping("ping: unknown host 192.0.2.1"), None);
    }

    #[test]
    fn replies_raise_and_silence_demotes() {
        let reply = parse_ping(REPLY);
        let silence = parse_ping(NO_REPLY);

        assert_eq!(
            classify_ping(NodeState::Unreachable, reply),
            NodeState::Reachable
        );
        // An already-elevated node is not dragged back down by its ping.
        assert_eq!(classify_ping(NodeState::Usable, reply), NodeState::Usable);
        assert_eq!(
            classify_ping(NodeState::Usable, silence),
            NodeState::Unreachable
        );
        assert_eq!(
            classify_ping(NodeState::Reachable, None),
            NodeState::Unreachable
        );
    }
}
