//! Shared data model for the deploypl fleet poller.
//!
//! The types here are deliberately dumb: a [`Node`] record, its ordered
//! [`NodeState`] classification, and the [`PoolStatus`] histograms rendered
//! by the `status` subcommand. All probing and persistence logic lives in
//! `deploypl-core`.

pub mod node;
pub mod state;
pub mod status;

pub use node::{Node, NodeProfile, UNKNOWN, node_id};
pub use state::{NodeState, UnknownStateError};
pub use status::{PoolStatus, STATUS_ATTRIBUTES};
