//! Core of the deploypl fleet poller: the node pool, its embedded store,
//! the seed loader, the resolver adapter, and the staged probe pipeline
//! that the daemon drives once per probing period.

pub mod error;
pub mod pool;
pub mod poller;
pub mod probe;
pub mod resolve;
pub mod seed;
pub mod store;

pub use error::{DeployError, Result};
pub use pool::{NodePool, StateFilter};
pub use poller::{Poller, PollerConfig};
pub use resolve::{HostResolver, Resolve, is_valid_ipv4};
pub use seed::load_seed;
pub use store::{NoPrivileges, NodeStore, Privileges, StoreSession};
