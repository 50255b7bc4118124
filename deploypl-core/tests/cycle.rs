//! Walks a full probing cycle over a synthetic one-node fleet, with probe
//! outcomes injected at the classify/apply seam instead of live
//! subprocesses, and checks that the pool and the store agree after every
//! committed stage.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use deploypl_core::probe::ping::{classify_ping, parse_ping};
use deploypl_core::probe::profile::{apply_profile_outputs, apply_repair_outputs};
use deploypl_core::probe::ssh::{SshOutput, apply_ssh_outputs};
use deploypl_core::{NoPrivileges, NodePool, NodeStore, Resolve, StateFilter};
use deploypl_model::{Node, NodeState};

struct FixedResolver(HashMap<String, String>);

#[async_trait]
impl Resolve for FixedResolver {
    async fn resolve_a(&self, names: &[String]) -> HashMap<String, Option<String>> {
        names
            .iter()
            .map(|name| (name.clone(), self.0.get(name).cloned()))
            .collect()
    }
}

const PING_REPLY: &str = "\
PING 192.0.2.1 (192.0.2.1) 56(84) bytes of data.

--- 192.0.2.1 ping statistics ---
1 packets transmitted, 1 received, 0% packet loss, time 0ms
rtt min/avg/max/mdev = 0.045/0.045/0.045/0.000 ms
";

fn ssh_ok(host: &str, stdout: &str) -> SshOutput {
    SshOutput {
        host: host.to_string(),
        status: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

async fn committed(pool: &NodePool, store: &NodeStore) -> Vec<Node> {
    let mut session = store.session(&NoPrivileges).await.unwrap();
    pool.commit(&mut session).await.unwrap();
    session.commit().await.unwrap();

    let mut session = store.session(&NoPrivileges).await.unwrap();
    session.load_all().await.unwrap()
}

#[tokio::test]
async fn cold_start_single_seed_line_reaches_usable() {
    let store = NodeStore::open_in_memory().await.unwrap();
    let resolver = FixedResolver(
        [("node1.example.edu".to_string(), "192.0.2.1".to_string())]
            .into_iter()
            .collect(),
    );

    // Merge: one candidate, resolved and admitted.
    let mut pool = NodePool::new();
    let mut session = store.session(&NoPrivileges).await.unwrap();
    pool.merge(
        vec![Node::new("node1.example.edu", "auth1")],
        &mut session,
        &resolver,
    )
    .await
    .unwrap();
    session.commit().await.unwrap();
    assert_eq!(pool.len(), 1);

    // Ping stage: echo reply observed.
    let verdicts: Vec<NodeState> = pool
        .states()
        .into_iter()
        .map(|previous| classify_ping(previous, parse_ping(PING_REPLY)))
        .collect();
    pool.set_states(verdicts);
    let stored = committed(&pool, &store).await;
    assert_eq!(stored[0].state(), NodeState::Reachable);

    // Ssh reachability: session established.
    apply_ssh_outputs(&mut pool, &[ssh_ok("192.0.2.1", "")]);
    let stored = committed(&pool, &store).await;
    assert_eq!(stored[0].state(), NodeState::Accessible);

    // Fingerprint plus a clean repair check.
    apply_profile_outputs(
        &mut pool,
        &[ssh_ok(
            "192.0.2.1",
            "magic\nLinux 4.9.0\nFedora 20\nfd_tuntap.control\n",
        )],
    );
    apply_repair_outputs(&mut pool, &[ssh_ok("192.0.2.1", "installed\n")]);
    let stored = committed(&pool, &store).await;

    // After one cycle: usable, fully profiled, freshly seen.
    let node = &stored[0];
    assert_eq!(node.state(), NodeState::Usable);
    assert_eq!(node.kernel, "Linux 4.9.0");
    assert_eq!(node.os, "Fedora 20");
    assert!(node.vsys);
    let age = Utc::now().timestamp() - node.last_seen.timestamp();
    assert!((0..=5).contains(&age), "last_seen should be fresh: {age}s");

    // Pool and store agree on every attribute.
    let in_pool = &pool.nodes()[0];
    assert_eq!(node.id, in_pool.id);
    assert_eq!(node.name, in_pool.name);
    assert_eq!(node.addr, in_pool.addr);
    assert_eq!(node.authority, in_pool.authority);
    assert_eq!(node.state(), in_pool.state());
    assert_eq!(node.kernel, in_pool.kernel);
    assert_eq!(node.os, in_pool.os);
    assert_eq!(node.vsys, in_pool.vsys);
    assert_eq!(node.last_seen.timestamp(), in_pool.last_seen.timestamp());
}

#[tokio::test]
async fn repair_failure_demotes_but_keeps_the_profile() {
    let store = NodeStore::open_in_memory().await.unwrap();
    let resolver = FixedResolver(
        [("node1.example.edu".to_string(), "192.0.2.1".to_string())]
            .into_iter()
            .collect(),
    );

    let mut pool = NodePool::new();
    let mut session = store.session(&NoPrivileges).await.unwrap();
    pool.merge(
        vec![Node::new("node1.example.edu", "auth1")],
        &mut session,
        &resolver,
    )
    .await
    .unwrap();
    session.commit().await.unwrap();

    pool.set_states(vec![NodeState::Reachable]);
    apply_ssh_outputs(&mut pool, &[ssh_ok("192.0.2.1", "")]);
    apply_profile_outputs(
        &mut pool,
        &[ssh_ok("192.0.2.1", "magic\nLinux 4.9.0\nFedora 20\nnothing\n")],
    );
    assert_eq!(pool.states(), [NodeState::Usable]);

    // The package manager is broken: back to accessible.
    apply_repair_outputs(
        &mut pool,
        &[SshOutput {
            host: "192.0.2.1".to_string(),
            status: Some(1),
            stdout: String::new(),
            stderr: "Cannot find a valid baseurl".to_string(),
        }],
    );
    let stored = committed(&pool, &store).await;
    assert_eq!(stored[0].state(), NodeState::Accessible);
    assert_eq!(stored[0].kernel, "Linux 4.9.0");
    assert!(!stored[0].vsys);

    // The usable subset is empty now.
    assert!(pool.addrs(StateFilter::AtLeast(NodeState::Usable)).is_empty());
}

#[tokio::test]
async fn last_seen_is_monotone_across_cycles() {
    let store = NodeStore::open_in_memory().await.unwrap();
    let resolver = FixedResolver(
        [("node1.example.edu".to_string(), "192.0.2.1".to_string())]
            .into_iter()
            .collect(),
    );

    let mut pool = NodePool::new();
    let mut session = store.session(&NoPrivileges).await.unwrap();
    pool.merge(
        vec![Node::new("node1.example.edu", "auth1")],
        &mut session,
        &resolver,
    )
    .await
    .unwrap();
    session.commit().await.unwrap();

    // First cycle: reachable.
    pool.set_states(vec![NodeState::Reachable]);
    let seen_after_first = pool.nodes()[0].last_seen;

    // Second cycle: no reply; the timestamp must not move.
    pool.set_states(vec![NodeState::Unreachable]);
    assert_eq!(pool.nodes()[0].last_seen, seen_after_first);

    // Third cycle: reachable again; the timestamp may only grow.
    pool.set_states(vec![NodeState::Reachable]);
    assert!(pool.nodes()[0].last_seen >= seen_after_first);
}
