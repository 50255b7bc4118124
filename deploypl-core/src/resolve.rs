use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::net::lookup_host;
use tracing::debug;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Bulk hostname resolution.
///
/// Implementations map each name to at most one IPv4 address, run lookups in
/// parallel, and never error: a name that does not resolve in time simply
/// yields an absent entry. Callers still pass every answer through
/// [`is_valid_ipv4`] before admitting a node.
#[async_trait]
pub trait Resolve: Send + Sync {
    async fn resolve_a(&self, names: &[String]) -> HashMap<String, Option<String>>;
}

/// Resolver backed by the system's name service via tokio's `lookup_host`.
#[derive(Debug, Clone)]
pub struct HostResolver {
    timeout: Duration,
}

impl HostResolver {
    pub fn new() -> Self {
        HostResolver {
            timeout: LOOKUP_TIMEOUT,
        }
    }
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Resolve for HostResolver {
    async fn resolve_a(&self, names: &[String]) -> HashMap<String, Option<String>> {
        let lookups = names.iter().map(|name| async move {
            let addr = resolve_one(name, self.timeout).await;
            if addr.is_none() {
                debug!("no A record for {name}");
            }
            (name.clone(), addr)
        });
        join_all(lookups).await.into_iter().collect()
    }
}

async fn resolve_one(name: &str, limit: Duration) -> Option<String> {
    let addrs = tokio::time::timeout(limit, lookup_host(format!("{name}:0")))
        .await
        .ok()?
        .ok()?;
    addrs
        .filter_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4.ip().to_string()),
            SocketAddr::V6(_) => None,
        })
        .next()
}

/// Syntactic IPv4 check applied to resolver answers before a node is
/// admitted to the pool.
pub fn is_valid_ipv4(addr: &str) -> bool {
    addr.parse::<Ipv4Addr>().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_quads_are_valid() {
        assert!(is_valid_ipv4("192.0.2.1"));
        assert!(is_valid_ipv4("0.0.0.0"));
    }

    #[test]
    fn non_addresses_are_rejected() {
        assert!(!is_valid_ipv4("node1.example.edu"));
        assert!(!is_valid_ipv4("192.0.2"));
        assert!(!is_valid_ipv4("192.0.2.256"));
        assert!(!is_valid_ipv4("2001:db8::1"));
        assert!(!is_valid_ipv4(""));
    }

    #[tokio::test]
    async fn localhost_resolves_to_a_valid_answer() {
        let resolver = HostResolver::new();
        let names = vec!["localhost".to_string()];
        let answers = resolver.resolve_a(&names).await;
        assert_eq!(answers.len(), 1);
        if let Some(addr) = &answers["localhost"] {
            assert!(is_valid_ipv4(addr));
        }
    }
}
