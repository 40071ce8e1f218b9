//! End-to-end pool lifecycle against real forked children.
//!
//! Kept to a single test: reaping uses `waitpid(-1, …)`, so concurrent
//! tests in the same process would steal each other's children.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use respool_manager::{ConfigSource, IdleWorkerFactory, Pool, PoolEnv, PoolSignal};

#[test]
fn test_start_spawns_census_and_quit_drains() {
    let mut census = BTreeMap::new();
    census.insert("high,low".to_string(), 2);
    census.insert("solo".to_string(), 1);

    let env = PoolEnv {
        environment: None,
        interval: Duration::from_millis(20),
        verbose: false,
        very_verbose: false,
    };
    let mut pool = Pool::new(ConfigSource::Inline(census), Arc::new(IdleWorkerFactory))
        .with_env(env)
        .with_name("itest");

    pool.start().expect("pool start");

    // Initial census: two workers on "high,low", one on "solo".
    assert_eq!(pool.worker_count(), 3);
    assert_eq!(pool.count_in("high,low"), 2);
    assert_eq!(pool.count_in("solo"), 1);
    let pids = pool.all_pids();
    assert_eq!(pids.len(), 3);
    let distinct: std::collections::HashSet<u32> = pids.iter().copied().collect();
    assert_eq!(distinct.len(), 3);
    assert!(!pids.contains(&std::process::id()));

    // A graceful shutdown quits every child, drain-reaps them all, and
    // returns from join with an empty registry.
    pool.enqueue(PoolSignal::Quit);
    pool.join().expect("pool join");
    assert_eq!(pool.worker_count(), 0);
    assert!(pool.all_pids().is_empty());
}
