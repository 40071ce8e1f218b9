//! The worker seam and per-child bootstrap.
//!
//! The supervisor treats the job worker as an opaque polling loop supplied
//! by the embedder through [`WorkerFactory`]. Pool-awareness is added by
//! composition rather than inheritance: the [`WorkerContext`] handed to the
//! worker exposes a shutdown predicate that reports true once the master
//! has died (the child was reparented), and the bootstrap appends the
//! `[pool: <name>]` suffix to the process title. Workers layer their own
//! shutdown state on top.

use std::process;
use std::time::Duration;

use nix::unistd::getppid;
use respool_common::PoolResult;
use respool_process::procline;
use tracing::error;

use crate::registry::split_queues;
use crate::signals::{self, SelfPipe};

/// Pool name used when none is configured.
pub const DEFAULT_POOL_NAME: &str = "default";

/// Everything a worker needs to know at fork time.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Queue-group key, verbatim.
    pub group: String,
    /// Queue names in configured order.
    pub queues: Vec<String>,
    /// Polling interval.
    pub interval: Duration,
    pub verbose: bool,
    pub very_verbose: bool,
    /// Pool name for the process-title suffix.
    pub pool_name: String,
}

impl WorkerSpec {
    pub fn new(
        group: &str,
        interval: Duration,
        verbose: bool,
        very_verbose: bool,
        pool_name: &str,
    ) -> Self {
        Self {
            group: group.to_string(),
            queues: split_queues(group),
            interval,
            verbose,
            very_verbose,
            pool_name: pool_name.to_string(),
        }
    }
}

/// Child-side view of the pool, passed to the worker's polling loop.
pub struct WorkerContext {
    spec: WorkerSpec,
    master_pid: u32,
}

impl WorkerContext {
    pub fn new(spec: WorkerSpec, master_pid: u32) -> Self {
        Self { spec, master_pid }
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    pub fn queues(&self) -> &[String] {
        &self.spec.queues
    }

    pub fn interval(&self) -> Duration {
        self.spec.interval
    }

    /// True once the master is gone and the child has been reparented.
    ///
    /// Workers must treat this as an additional shutdown condition beside
    /// their own signal handling: `my_shutdown || ctx.shutdown_requested()`.
    pub fn shutdown_requested(&self) -> bool {
        getppid().as_raw() as u32 != self.master_pid
    }
}

/// A job worker's polling loop.
pub trait Worker {
    /// Poll the context's queues at the context's interval until shutdown.
    fn run(&mut self, ctx: &WorkerContext) -> PoolResult<()>;
}

/// Creates a worker inside the freshly-forked child.
pub trait WorkerFactory: Send + Sync {
    fn create(&self, spec: &WorkerSpec) -> Box<dyn Worker>;
}

impl<F> WorkerFactory for F
where
    F: Fn(&WorkerSpec) -> Box<dyn Worker> + Send + Sync,
{
    fn create(&self, spec: &WorkerSpec) -> Box<dyn Worker> {
        self(spec)
    }
}

/// A worker that does no job processing: it sleeps at the polling interval
/// until shut down. Used for smoke-testing pool behavior end to end.
#[derive(Debug, Default)]
pub struct IdleWorker;

impl Worker for IdleWorker {
    fn run(&mut self, ctx: &WorkerContext) -> PoolResult<()> {
        while !ctx.shutdown_requested() {
            std::thread::sleep(ctx.interval());
        }
        Ok(())
    }
}

/// Factory for [`IdleWorker`].
#[derive(Debug, Default)]
pub struct IdleWorkerFactory;

impl WorkerFactory for IdleWorkerFactory {
    fn create(&self, _spec: &WorkerSpec) -> Box<dyn Worker> {
        Box::new(IdleWorker)
    }
}

/// Post-fork setup and worker invocation. Never returns.
///
/// Runs in the child: restores default signal dispositions (the master's
/// deferred handlers must not survive the fork), detaches the inherited
/// self-pipe, runs the after-prefork hook once, titles the process, and
/// enters the worker's polling loop.
pub(crate) fn run_child(
    factory: &dyn WorkerFactory,
    spec: WorkerSpec,
    master_pid: u32,
    after_prefork: Option<&(dyn Fn() + Send + Sync)>,
    pipe: &SelfPipe,
) -> ! {
    signals::reset_child_dispositions();
    pipe.close_in_child();

    if let Some(hook) = after_prefork {
        hook();
    }

    procline::set_title(&format!(
        "resque-pool-worker: {} [pool: {}]",
        spec.queues.join(","),
        spec.pool_name
    ));

    let mut worker = factory.create(&spec);
    let ctx = WorkerContext::new(spec, master_pid);
    match worker.run(&ctx) {
        Ok(()) => process::exit(0),
        Err(e) => {
            error!("Worker failed: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_splits_queues_in_order() {
        let spec = WorkerSpec::new("high,low", Duration::from_secs(5), true, false, "default");
        assert_eq!(spec.queues, vec!["high", "low"]);
        assert_eq!(spec.group, "high,low");
        assert!(spec.verbose);
        assert!(!spec.very_verbose);
    }

    #[test]
    fn test_shutdown_predicate_tracks_parent() {
        let spec = WorkerSpec::new("q", Duration::from_millis(1), false, false, "default");

        // Pretend our actual parent is the master: no shutdown.
        let parent = getppid().as_raw() as u32;
        let ctx = WorkerContext::new(spec.clone(), parent);
        assert!(!ctx.shutdown_requested());

        // A master pid that is not our parent reads as "master died".
        let ctx = WorkerContext::new(spec, parent.wrapping_add(1));
        assert!(ctx.shutdown_requested());
    }

    #[test]
    fn test_idle_worker_exits_once_shutdown() {
        let spec = WorkerSpec::new("q", Duration::from_millis(1), false, false, "default");
        let ctx = WorkerContext::new(spec, 0); // pid 0 is never our parent
        assert!(IdleWorker.run(&ctx).is_ok());
    }
}
