use deploypl_config::DaemonConfig;
use deploypl_core::{
    DeployError, HostResolver, NodePool, NodeStore, Privileges, Result, StateFilter,
};
use deploypl_model::NodeState;

/// Printed whenever the requested view has nothing to show.
pub const EMPTY_MESSAGE: &str = "No usable node found.";

/// Render the pool aggregates for the `status` subcommand.
///
/// This is the read-only path: the pool is built by merging an empty seed
/// with the current store, no resolution happens, and the session is
/// dropped without committing, so not a single row is touched. Verbosity 0
/// lists usable nodes, 1 renders histograms over the usable subset, 2 and
/// above over the whole pool.
pub async fn render_status(
    config: &DaemonConfig,
    privileges: &dyn Privileges,
    verbosity: u8,
    names: bool,
) -> Result<String> {
    let store = NodeStore::open(&config.store_file(), privileges).await?;
    let mut session = store.session(privileges).await?;
    let mut pool = NodePool::new();
    match pool
        .merge(Vec::new(), &mut session, &HostResolver::new())
        .await
    {
        Err(DeployError::EmptyPool) => return Ok(EMPTY_MESSAGE.to_string()),
        other => other?,
    }
    drop(session);

    let usable = StateFilter::AtLeast(NodeState::Usable);
    let report = match verbosity {
        0 => {
            let listed = if names {
                pool.names(usable)
            } else {
                pool.addrs(usable)
            };
            listed.join("\n")
        }
        1 => {
            let status = pool.status(usable);
            if status.is_empty() {
                String::new()
            } else {
                status.to_string()
            }
        }
        _ => pool.status(StateFilter::Any).to_string(),
    };

    if report.is_empty() {
        Ok(EMPTY_MESSAGE.to_string())
    } else {
        Ok(report)
    }
}
