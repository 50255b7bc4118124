use std::collections::HashSet;

use deploypl_model::{Node, NodeProfile, NodeState, PoolStatus};
use tracing::debug;

use crate::error::{DeployError, Result};
use crate::resolve::{Resolve, is_valid_ipv4};
use crate::store::StoreSession;

/// State predicate used by pool selectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateFilter {
    Any,
    AtLeast(NodeState),
    Exactly(NodeState),
}

impl StateFilter {
    pub fn admits(self, state: NodeState) -> bool {
        match self {
            StateFilter::Any => true,
            StateFilter::AtLeast(min) => state >= min,
            StateFilter::Exactly(wanted) => state == wanted,
        }
    }
}

/// The in-memory authoritative view of the fleet.
///
/// The pool is owned by the poller once the daemon is running; probe stages
/// get transient access between commits. Selectors return projections in
/// pool-insertion order, and the positional setters rely on that pairing:
/// a stage must produce its output values from the same selector call it
/// took its inputs from.
#[derive(Debug, Default)]
pub struct NodePool {
    nodes: Vec<Node>,
}

impl NodePool {
    pub fn new() -> Self {
        NodePool::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Merge the persisted pool with seed candidates.
    ///
    /// Store rows are admitted unconditionally. Seed candidates not already
    /// in the store are resolved in bulk; only those answering with a valid
    /// IPv4 are kept, inserted into the store, and appended to the pool.
    /// A combined pool with no nodes at all is an error.
    pub async fn merge(
        &mut self,
        seed: Vec<Node>,
        session: &mut StoreSession<'_>,
        resolver: &dyn Resolve,
    ) -> Result<()> {
        let stored = session.load_all().await?;
        let known: HashSet<i64> = stored.iter().map(|n| n.id).collect();
        let candidates: Vec<Node> = seed
            .into_iter()
            .filter(|n| !known.contains(&n.id))
            .collect();
        debug!(
            "read {} node entries from the store and {} new candidates from the seed",
            stored.len(),
            candidates.len()
        );

        let fresh = resolve_candidates(candidates, resolver).await;
        session.insert_all(&fresh).await?;

        self.nodes = stored;
        self.nodes.extend(fresh);
        if self.nodes.is_empty() {
            return Err(DeployError::EmptyPool);
        }
        Ok(())
    }

    /// Addresses of every node in pool order, present or not. The ping
    /// stage pairs its verdicts positionally against this projection.
    pub fn probe_targets(&self) -> Vec<Option<String>> {
        self.nodes.iter().map(|n| n.addr.clone()).collect()
    }

    /// Addresses of nodes admitted by `filter` that have one.
    pub fn addrs(&self, filter: StateFilter) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| filter.admits(n.state()))
            .filter_map(|n| n.addr.clone())
            .collect()
    }

    /// Names of nodes admitted by `filter`.
    pub fn names(&self, filter: StateFilter) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|n| filter.admits(n.state()))
            .map(|n| n.name.clone())
            .collect()
    }

    /// Current classifications in pool order.
    pub fn states(&self) -> Vec<NodeState> {
        self.nodes.iter().map(|n| n.state()).collect()
    }

    /// Assign one classification per node, in pool order. A length mismatch
    /// is a programming error in the calling stage.
    pub fn set_states(&mut self, states: Vec<NodeState>) {
        assert_eq!(
            states.len(),
            self.nodes.len(),
            "positional state assignment must cover the whole pool"
        );
        for (node, state) in self.nodes.iter_mut().zip(states) {
            node.set_state(state);
        }
    }

    /// Record a positive observation for the first node with this address:
    /// the node rises to `floor` if below it, and `last_seen` refreshes
    /// either way.
    pub fn raise_state_by_addr(&mut self, addr: &str, floor: NodeState) {
        if let Some(node) = self.node_by_addr_mut(addr) {
            let state = node.state().max(floor);
            node.set_state(state);
        }
    }

    /// Demote the first node with this address.
    pub fn demote_state_by_addr(&mut self, addr: &str, state: NodeState) {
        if let Some(node) = self.node_by_addr_mut(addr) {
            node.set_state(state);
        }
    }

    /// Apply fingerprint attributes to the first node with this address.
    pub fn apply_profile_by_addr(&mut self, addr: &str, profile: &NodeProfile) {
        if let Some(node) = self.node_by_addr_mut(addr) {
            node.apply_profile(profile);
        }
    }

    #[cfg(test)]
    pub(crate) fn push_for_tests(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn node_by_addr(&self, addr: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.addr.as_deref() == Some(addr))
    }

    fn node_by_addr_mut(&mut self, addr: &str) -> Option<&mut Node> {
        self.nodes
            .iter_mut()
            .find(|n| n.addr.as_deref() == Some(addr))
    }

    /// Write every node back to the store by id.
    pub async fn commit(&self, session: &mut StoreSession<'_>) -> Result<()> {
        for node in &self.nodes {
            session.update(node).await?;
        }
        Ok(())
    }

    /// Per-attribute value histograms over the admitted subset.
    pub fn status(&self, filter: StateFilter) -> PoolStatus {
        PoolStatus::over(self.nodes.iter().filter(|n| filter.admits(n.state())))
    }
}

async fn resolve_candidates(mut candidates: Vec<Node>, resolver: &dyn Resolve) -> Vec<Node> {
    if candidates.is_empty() {
        return candidates;
    }

    debug!("performing {} DNS lookups", candidates.len());
    let names: Vec<String> = candidates.iter().map(|n| n.name.clone()).collect();
    let answers = resolver.resolve_a(&names).await;

    for node in &mut candidates {
        if let Some(Some(addr)) = answers.get(&node.name)
            && is_valid_ipv4(addr)
        {
            node.addr = Some(addr.clone());
        }
    }
    let kept: Vec<Node> = candidates.into_iter().filter(|n| n.addr.is_some()).collect();
    debug!("received {} valid DNS responses", kept.len());
    kept
}
