use std::fmt::{self, Display, Formatter};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state::NodeState;

/// Default value for profile attributes that have not been observed yet.
pub const UNKNOWN: &str = "UNKNOWN";

/// Stable 63-bit identifier derived from a node name.
///
/// The id is a pure function of the name: the first eight bytes of the
/// sha-256 digest, masked to a non-negative `i64` so it fits a signed
/// integer primary key. Two nodes with equal names are the same node.
pub fn node_id(name: &str) -> i64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(raw) & i64::MAX as u64) as i64
}

/// Fingerprint attributes reported by the ssh profiling probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProfile {
    pub kernel: String,
    pub os: String,
    pub vsys: bool,
}

/// A single fleet node and everything the daemon knows about it.
///
/// `state` is private: assignments go through [`Node::set_state`], which
/// refreshes `last_seen` whenever the node is observed above
/// [`NodeState::Unreachable`]. `last_seen` stays at the Unix epoch until the
/// first positive observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: i64,
    pub name: String,
    /// Resolved IPv4 address, dotted quad. Absent until resolution; a node
    /// without an address never participates in ping or ssh stages.
    pub addr: Option<String>,
    /// Short origin tag from the seed file, opaque to the daemon.
    pub authority: String,
    state: NodeState,
    pub kernel: String,
    pub os: String,
    pub vsys: bool,
    pub last_seen: DateTime<Utc>,
}

impl Node {
    /// A fresh candidate from the seed file: unreachable, unprofiled,
    /// unresolved.
    pub fn new(name: impl Into<String>, authority: impl Into<String>) -> Self {
        let name = name.into();
        Node {
            id: node_id(&name),
            name,
            addr: None,
            authority: authority.into(),
            state: NodeState::Unreachable,
            kernel: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            vsys: false,
            last_seen: DateTime::UNIX_EPOCH,
        }
    }

    /// Rebuild a node from persisted attributes, bypassing the `last_seen`
    /// refresh. Used when loading rows from the store.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        name: String,
        addr: Option<String>,
        authority: String,
        state: NodeState,
        kernel: String,
        os: String,
        vsys: bool,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Node {
            id: node_id(&name),
            name,
            addr,
            authority,
            state,
            kernel,
            os,
            vsys,
            last_seen,
        }
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Assign a new classification. Observations above `Unreachable`
    /// refresh `last_seen`; demotions and unreachable verdicts leave it
    /// untouched, so the timestamp is monotonically non-decreasing.
    pub fn set_state(&mut self, state: NodeState) {
        if state > NodeState::Unreachable {
            self.last_seen = Utc::now();
        }
        self.state = state;
    }

    /// Apply a fingerprint reported by the profiling probe.
    pub fn apply_profile(&mut self, profile: &NodeProfile) {
        self.kernel = profile.kernel.clone();
        self.os = profile.os.clone();
        self.vsys = profile.vsys;
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} node {} is {}",
            self.authority, self.name, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_a_pure_function_of_the_name() {
        assert_eq!(node_id("node1.example.edu"), node_id("node1.example.edu"));
        assert_ne!(node_id("node1.example.edu"), node_id("node2.example.edu"));
        assert!(node_id("node1.example.edu") >= 0);
    }

    #[test]
    fn equality_is_id_equality() {
        let a = Node::new("node1.example.edu", "auth1");
        let b = Node::new("node1.example.edu", "auth2");
        let c = Node::new("node2.example.edu", "auth1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn fresh_nodes_carry_defaults() {
        let node = Node::new("node1.example.edu", "auth1");
        assert_eq!(node.state(), NodeState::Unreachable);
        assert_eq!(node.kernel, UNKNOWN);
        assert_eq!(node.os, UNKNOWN);
        assert!(!node.vsys);
        assert!(node.addr.is_none());
        assert_eq!(node.last_seen, DateTime::UNIX_EPOCH);
    }

    #[test]
    fn positive_observations_refresh_last_seen() {
        let mut node = Node::new("node1.example.edu", "auth1");

        node.set_state(NodeState::Unreachable);
        assert_eq!(node.last_seen, DateTime::UNIX_EPOCH);

        node.set_state(NodeState::Reachable);
        let seen = node.last_seen;
        assert!(seen > DateTime::UNIX_EPOCH);

        node.set_state(NodeState::Unreachable);
        assert_eq!(node.last_seen, seen);
    }

    #[test]
    fn profile_application_leaves_identity_alone() {
        let mut node = Node::new("node1.example.edu", "auth1");
        let id = node.id;
        node.apply_profile(&NodeProfile {
            kernel: "Linux 4.9.0".to_string(),
            os: "Fedora 20".to_string(),
            vsys: true,
        });
        assert_eq!(node.id, id);
        assert_eq!(node.kernel, "Linux 4.9.0");
        assert_eq!(node.os, "Fedora 20");
        assert!(node.vsys);
    }
}
