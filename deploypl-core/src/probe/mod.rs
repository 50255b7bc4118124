//! Probe stages and their shared bounded-concurrency executor.
//!
//! Each stage walks a worklist in chunks of at most `limit` items, one
//! subprocess or ssh session per item, and waits for the whole chunk before
//! advancing. Chunked wait-all keeps fan-out capped against descriptor and
//! bandwidth limits with predictable per-cycle completion bounds.

pub mod ping;
pub mod profile;
pub mod ssh;

use std::future::Future;

use futures::future::join_all;

pub(crate) async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, run: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let limit = limit.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut queue = items.into_iter();
    loop {
        let chunk: Vec<Fut> = queue.by_ref().take(limit).map(&run).collect();
        if chunk.is_empty() {
            break;
        }
        results.extend(join_all(chunk).await);
    }
    results
}
