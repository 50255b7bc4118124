use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Classification of a fleet node, ordered from worst to best.
///
/// The order is total and probes rely on it for their "min-state" selectors:
/// a stage only ever considers nodes at or above its input rank, and only
/// moves a node through its own transition. Comparison is on rank alone.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    /// No ICMP echo reply within the deadline.
    Unreachable = 1,
    /// The node answers ping requests but no ssh session could be
    /// established yet.
    Reachable = 2,
    /// An ssh session establishes and returns an exit status.
    Accessible = 3,
    /// The fingerprint probe succeeded and the repair step did not demote.
    Usable = 4,
}

impl NodeState {
    /// Numeric rank, 1 (worst) to 4 (best).
    pub fn rank(self) -> u8 {
        self as u8
    }

    /// Textual name, as persisted in the node store.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Unreachable => "unreachable",
            NodeState::Reachable => "reachable",
            NodeState::Accessible => "accessible",
            NodeState::Usable => "usable",
        }
    }
}

impl Display for NodeState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a state name that is not one of the four
/// known classifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStateError(pub String);

impl Display for UnknownStateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "unknown node state: {}", self.0)
    }
}

impl std::error::Error for UnknownStateError {}

impl FromStr for NodeState {
    type Err = UnknownStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unreachable" => Ok(NodeState::Unreachable),
            "reachable" => Ok(NodeState::Reachable),
            "accessible" => Ok(NodeState::Accessible),
            "usable" => Ok(NodeState::Usable),
            other => Err(UnknownStateError(other.to_string())),
        }
    }
}
