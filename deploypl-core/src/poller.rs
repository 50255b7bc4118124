use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use deploypl_model::{Node, NodeState, PoolStatus};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::pool::{NodePool, StateFilter};
use crate::probe::ping::ping_stage;
use crate::probe::profile::profile_stage;
use crate::probe::ssh::{SshRunner, ssh_stage};
use crate::resolve::Resolve;
use crate::store::{NodeStore, Privileges};

/// Pipeline knobs, lifted from the daemon configuration.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Wall-clock seconds between cycles.
    pub period: Duration,
    /// Sleep one full period before the first cycle.
    pub initial_delay: bool,
    /// Fan-out cap for the ping stage.
    pub thread_limit: usize,
    /// Fan-out cap for the ssh stages.
    pub ssh_limit: usize,
    /// Remote login slice.
    pub slice: String,
    /// Operator name, used as the remote working directory.
    pub user: String,
    /// Private key for ssh probes.
    pub ssh_keyloc: PathBuf,
}

/// The orchestrator: drives the staged probe pipeline over the pool once
/// per period, committing to the store between stages so that a crash
/// mid-cycle loses at most the most recent stage's observations.
pub struct Poller {
    pool: NodePool,
    store: NodeStore,
    runner: SshRunner,
    privileges: Arc<dyn Privileges>,
    config: PollerConfig,
    started: Instant,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("pool", &self.pool.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Poller {
    /// Build the pool by merging the seed with the store, then stand up the
    /// pipeline. Fails with `EmptyPool` when there is nothing to poll.
    pub async fn bootstrap(
        config: PollerConfig,
        store: NodeStore,
        seed: Vec<Node>,
        resolver: &dyn Resolve,
        privileges: Arc<dyn Privileges>,
    ) -> Result<Self> {
        let mut pool = NodePool::new();
        let mut session = store.session(privileges.as_ref()).await?;
        pool.merge(seed, &mut session, resolver).await?;
        session.commit().await?;
        info!("polling {} nodes", pool.len());

        let runner = SshRunner::new(
            config.slice.clone(),
            config.ssh_keyloc.clone(),
            config.ssh_limit,
        );
        Ok(Poller {
            pool,
            store,
            runner,
            privileges,
            config,
            started: Instant::now(),
        })
    }

    /// Time since the poller was stood up.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Aggregate histograms over the current pool.
    pub fn status(&self, filter: StateFilter) -> PoolStatus {
        self.pool.status(filter)
    }

    /// Enter the polling loop. Never returns; the daemon drops the future
    /// when a termination signal arrives.
    pub async fn run(&mut self) {
        if self.config.initial_delay {
            debug!("initial delay: sleeping {:?}", self.config.period);
            tokio::time::sleep(self.config.period).await;
        }
        loop {
            let cycle_started = Instant::now();
            self.cycle().await;
            info!(
                "cycle completed in {:.0?}, uptime {:.0?}, usable {}",
                cycle_started.elapsed(),
                self.uptime(),
                self.pool
                    .addrs(StateFilter::AtLeast(NodeState::Usable))
                    .len(),
            );
            debug!("pool status:\n{}", self.pool.status(StateFilter::Any));
            tokio::time::sleep(self.config.period).await;
        }
    }

    /// One full pass: ping, ssh reachability, fingerprint and repair, with
    /// a committed store snapshot after every stage.
    async fn cycle(&mut self) {
        ping_stage(&mut self.pool, self.config.thread_limit).await;
        self.commit().await;

        ssh_stage(&mut self.pool, &self.runner, &self.config.user).await;
        self.commit().await;

        profile_stage(&mut self.pool, &self.runner).await;
        self.commit().await;
    }

    /// Mirror the pool into the store. A failed transaction rolls back and
    /// is logged; the stage's in-memory observations are simply not durable
    /// and the loop continues.
    async fn commit(&mut self) {
        if let Err(err) = self.try_commit().await {
            warn!("store commit failed, continuing with non-durable state: {err}");
        }
    }

    async fn try_commit(&mut self) -> Result<()> {
        let mut session = self.store.session(self.privileges.as_ref()).await?;
        self.pool.commit(&mut session).await?;
        session.commit().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NoPrivileges;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct OneAnswerResolver;

    #[async_trait]
    impl Resolve for OneAnswerResolver {
        async fn resolve_a(&self, names: &[String]) -> HashMap<String, Option<String>> {
            names
                .iter()
                .map(|name| {
                    let addr =
                        (name.as_str() == "node1.example.edu").then(|| "192.0.2.1".to_string());
                    (name.clone(), addr)
                })
                .collect()
        }
    }

    fn config() -> PollerConfig {
        PollerConfig {
            period: Duration::from_secs(3600),
            initial_delay: false,
            thread_limit: 10,
            ssh_limit: 10,
            slice: "inria_ple".to_string(),
            user: "operator".to_string(),
            ssh_keyloc: PathBuf::from("/tmp/key"),
        }
    }

    #[tokio::test]
    async fn bootstrap_merges_seed_and_store() {
        let store = NodeStore::open_in_memory().await.unwrap();
        let seed = vec![
            Node::new("node1.example.edu", "auth1"),
            Node::new("ghost.example.edu", "auth2"),
        ];
        let poller = Poller::bootstrap(
            config(),
            store,
            seed,
            &OneAnswerResolver,
            Arc::new(NoPrivileges),
        )
        .await
        .unwrap();

        let status = poller.status(StateFilter::Any);
        assert_eq!(status.total("state"), 1);
        assert_eq!(
            status.attribute("state"),
            &[("unreachable".to_string(), 1)]
        );
    }

    #[tokio::test]
    async fn bootstrap_fails_on_an_empty_pool() {
        let store = NodeStore::open_in_memory().await.unwrap();
        let err = Poller::bootstrap(
            config(),
            store,
            Vec::new(),
            &OneAnswerResolver,
            Arc::new(NoPrivileges),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::DeployError::EmptyPool));
    }
}
