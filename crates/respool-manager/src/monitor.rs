//! Resource monitoring: memory-based eviction and orphan accounting.
//!
//! The sweep runs at the tail of idle loop iterations, gated to once per
//! [`MONITOR_INTERVAL`]. A worker whose dirtied memory (its own plus its
//! job grandchildren's) crosses [`MEM_QUIT_THRESHOLD_MB`] is asked to stop
//! gracefully; past [`MEM_TERM_THRESHOLD_MB`] it is TERM'd and put on the
//! watchlist, where anything still alive a cycle later is SIGKILL'd.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::Utc;
use respool_process::procline::FAMILY_COMM_PREFIX;
use respool_process::{check, memory, signal, ProcessTable};
use tracing::{debug, info, warn};

use crate::jobs::JobRegistry;
use crate::registry::WorkerRegistry;

/// Memory above which a worker is asked to stop gracefully (QUIT).
pub const MEM_QUIT_THRESHOLD_MB: u64 = 250;

/// Memory above which a worker is stopped forcefully (TERM, then KILL).
pub const MEM_TERM_THRESHOLD_MB: u64 = 500;

/// Minimum spacing between sweeps, and between orphan enumerations.
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(60);

/// What the memory sweep decided for one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemVerdict {
    Ok,
    /// Over the graceful threshold: QUIT.
    GracefulStop,
    /// Over the forceful threshold: TERM now, KILL next cycle if needed.
    ForcefulStop,
}

/// Classify a worker's dirtied-memory total.
pub fn classify_memory(total_mb: u64) -> MemVerdict {
    if total_mb > MEM_TERM_THRESHOLD_MB {
        MemVerdict::ForcefulStop
    } else if total_mb > MEM_QUIT_THRESHOLD_MB {
        MemVerdict::GracefulStop
    } else {
        MemVerdict::Ok
    }
}

/// Pids that were TERM'd and may need escalation to SIGKILL.
#[derive(Debug, Default)]
pub struct TermWatchlist {
    pids: HashSet<u32>,
}

impl TermWatchlist {
    pub fn add(&mut self, pid: u32) {
        self.pids.insert(pid);
    }

    pub fn contains(&self, pid: u32) -> bool {
        self.pids.contains(&pid)
    }

    pub fn len(&self) -> usize {
        self.pids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Drop pids the OS no longer reports, then hand every remaining pid to
    /// `kill` — anything TERM'd a cycle ago and still alive dies now.
    pub fn escalate(&mut self, alive: impl Fn(u32) -> bool, mut kill: impl FnMut(u32)) {
        self.pids.retain(|pid| alive(*pid));
        for pid in &self.pids {
            kill(*pid);
        }
    }
}

/// Cached orphan census.
///
/// Enumeration walks the whole process table, so it runs at most once per
/// [`MONITOR_INTERVAL`]; between enumerations the cache is merely filtered
/// by liveness, and an emptied cache triggers re-enumeration when next due.
#[derive(Debug, Default)]
pub struct OrphanState {
    pids: HashSet<u32>,
    last_enumeration: Option<Instant>,
}

impl OrphanState {
    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Advance the cache: filter a populated cache by liveness, or
    /// re-enumerate an empty one when the interval allows.
    pub fn tick(
        &mut self,
        now: Instant,
        enumerate: impl FnOnce() -> HashSet<u32>,
        alive: impl Fn(u32) -> bool,
    ) {
        if !self.pids.is_empty() {
            self.pids.retain(|pid| alive(*pid));
            return;
        }
        let due = self
            .last_enumeration
            .map_or(true, |last| now.duration_since(last) >= MONITOR_INTERVAL);
        if due {
            self.pids = enumerate();
            self.last_enumeration = Some(now);
            if !self.pids.is_empty() {
                warn!(
                    "Found {} orphaned job-family processes: {:?}",
                    self.pids.len(),
                    self.pids
                );
            }
        }
    }
}

/// Job-family processes whose parent has died and which the supervisor did
/// not fork: reparented workers or abandoned job grandchildren.
pub fn enumerate_orphans(
    table: &ProcessTable,
    registry: &WorkerRegistry,
    master_pid: u32,
) -> HashSet<u32> {
    let family = table.family(FAMILY_COMM_PREFIX);
    family
        .iter()
        .copied()
        .filter(|pid| *pid != master_pid)
        .filter(|pid| !registry.contains(*pid))
        .filter(|pid| match table.parent_of(*pid) {
            Some(parent) => !family.contains(&parent),
            None => true,
        })
        .collect()
}

/// The supervisor's resource monitor: watchlist, memory sweep, orphan cache.
#[derive(Debug, Default)]
pub struct ResourceMonitor {
    watchlist: TermWatchlist,
    orphans: OrphanState,
    last_sweep: Option<Instant>,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orphan count for the reconciler's offset.
    pub fn orphan_count(&self) -> usize {
        self.orphans.count()
    }

    /// Whether the next `run` would actually sweep.
    pub fn sweep_due(&self, now: Instant) -> bool {
        self.last_sweep
            .map_or(true, |last| now.duration_since(last) >= MONITOR_INTERVAL)
    }

    /// Run one monitor pass: escalate the watchlist, sweep memory, refresh
    /// the orphan cache. Gated internally; calling every iteration is fine.
    pub fn run(
        &mut self,
        now: Instant,
        registry: &WorkerRegistry,
        jobs: &dyn JobRegistry,
        hostname: &str,
        master_pid: u32,
    ) {
        if !self.sweep_due(now) {
            // Between sweeps, keep the cached orphan census honest: filter
            // by liveness, or re-enumerate if the cache emptied and its own
            // interval has passed.
            self.orphans.tick(
                now,
                || {
                    let table = ProcessTable::snapshot();
                    enumerate_orphans(&table, registry, master_pid)
                },
                check::process_alive,
            );
            return;
        }
        self.last_sweep = Some(now);

        let table = ProcessTable::snapshot();
        self.orphans.tick(
            now,
            || enumerate_orphans(&table, registry, master_pid),
            check::process_alive,
        );

        self.watchlist.escalate(check::process_alive, |pid| {
            warn!("Worker {} ignored SIGTERM, sending SIGKILL", pid);
            if let Err(e) = signal::kill_hard(pid) {
                debug!("{}", e);
            }
        });

        for worker in registry.handles() {
            let grandchildren = table.children_of(worker.pid);
            let total_mb = memory::private_dirty_mb(worker.pid)
                + grandchildren
                    .iter()
                    .map(|pid| memory::private_dirty_mb(*pid))
                    .sum::<u64>();
            match classify_memory(total_mb) {
                MemVerdict::Ok => {}
                MemVerdict::GracefulStop => {
                    self.log_job_diagnostic(jobs, hostname, worker.pid);
                    info!(
                        "Worker {} using {} MB (queues: {}), stopping gracefully",
                        worker.pid,
                        total_mb,
                        worker.queues.join(",")
                    );
                    if let Err(e) = signal::quit(worker.pid) {
                        debug!("{}", e);
                    }
                }
                MemVerdict::ForcefulStop => {
                    self.log_job_diagnostic(jobs, hostname, worker.pid);
                    warn!(
                        "Worker {} using {} MB (queues: {}), stopping forcefully",
                        worker.pid,
                        total_mb,
                        worker.queues.join(",")
                    );
                    if let Err(e) = signal::term(worker.pid) {
                        debug!("{}", e);
                    }
                    self.watchlist.add(worker.pid);
                    for grandchild in grandchildren {
                        if let Err(e) = signal::term(grandchild) {
                            debug!("{}", e);
                        }
                        self.watchlist.add(grandchild);
                    }
                }
            }
        }
    }

    /// Log what the worker was doing before we signal it. Failures here
    /// never block the kill.
    fn log_job_diagnostic(&self, jobs: &dyn JobRegistry, hostname: &str, pid: u32) {
        if let Some(job) = jobs.current_job(hostname, pid) {
            info!(
                "Worker {} current job ({}s elapsed): {}",
                pid,
                job.runtime_secs(Utc::now()),
                job.description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_classification_boundaries() {
        assert_eq!(classify_memory(0), MemVerdict::Ok);
        assert_eq!(classify_memory(MEM_QUIT_THRESHOLD_MB), MemVerdict::Ok);
        assert_eq!(
            classify_memory(MEM_QUIT_THRESHOLD_MB + 1),
            MemVerdict::GracefulStop
        );
        assert_eq!(
            classify_memory(MEM_TERM_THRESHOLD_MB),
            MemVerdict::GracefulStop
        );
        assert_eq!(
            classify_memory(MEM_TERM_THRESHOLD_MB + 1),
            MemVerdict::ForcefulStop
        );
        assert_eq!(classify_memory(510), MemVerdict::ForcefulStop);
    }

    #[test]
    fn test_watchlist_prunes_dead_then_kills_alive() {
        let mut watchlist = TermWatchlist::default();
        watchlist.add(100);
        watchlist.add(200);
        watchlist.add(300);

        let mut killed = Vec::new();
        watchlist.escalate(|pid| pid != 200, |pid| killed.push(pid));

        killed.sort_unstable();
        assert_eq!(killed, vec![100, 300]);
        assert!(!watchlist.contains(200));
        assert_eq!(watchlist.len(), 2);
    }

    #[test]
    fn test_orphan_cache_filters_between_enumerations() {
        let mut orphans = OrphanState::default();
        let start = Instant::now();

        orphans.tick(start, || HashSet::from([7, 8]), |_| true);
        assert_eq!(orphans.count(), 2);

        // Cache populated: enumeration must not run again, only the filter.
        orphans.tick(start, || panic!("must not re-enumerate"), |pid| pid == 7);
        assert_eq!(orphans.count(), 1);
    }

    #[test]
    fn test_orphan_reenumeration_waits_for_interval() {
        let mut orphans = OrphanState::default();
        let start = Instant::now();

        orphans.tick(start, || HashSet::from([7]), |_| true);
        orphans.tick(start, || unreachable!(), |_| false);
        assert_eq!(orphans.count(), 0);

        // Emptied, but inside the interval: still no enumeration.
        orphans.tick(start, || panic!("too soon"), |_| true);

        // Past the interval: enumerate again.
        orphans.tick(start + MONITOR_INTERVAL, || HashSet::from([9]), |_| true);
        assert_eq!(orphans.count(), 1);
    }

    #[test]
    fn test_sweep_gating() {
        let monitor = ResourceMonitor::new();
        let now = Instant::now();
        assert!(monitor.sweep_due(now));

        let mut monitor = ResourceMonitor::new();
        monitor.last_sweep = Some(now);
        assert!(!monitor.sweep_due(now + Duration::from_secs(1)));
        assert!(monitor.sweep_due(now + MONITOR_INTERVAL));
    }
}
