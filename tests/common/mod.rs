//! Shared helpers for multi-rank tests.

use std::sync::Arc;
use std::thread;
use zshard::comm::{self, LocalGroup, ParallelMode};

/// Run `f` once per rank, each on its own thread with global and data
/// groups wired to a shared in-process hub. Results come back in rank
/// order; a panic on any rank fails the test.
pub fn run_ranks<T, F>(world: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(&LocalGroup) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = LocalGroup::connect(world)
        .into_iter()
        .map(|endpoint| {
            let f = Arc::clone(&f);
            thread::spawn(move || {
                comm::register_group(ParallelMode::Global, Arc::new(endpoint.clone()));
                comm::register_group(ParallelMode::Data, Arc::new(endpoint.clone()));
                f(&endpoint)
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().expect("rank thread panicked"))
        .collect()
}
