//! The pool master: a signal-driven, single-threaded supervisor loop.
//!
//! All mutable supervisor state lives here and is touched only through
//! `&mut self` from the loop thread; signal handlers are confined to the
//! atomic intake block in [`crate::signals`]. That structure is what makes
//! config reloads safe against concurrent signal delivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use nix::unistd::{fork, getpid, ForkResult};
use respool_common::{PoolError, PoolResult};
use respool_process::{procline, signal};
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, DesiredCensus, PoolEnv};
use crate::jobs::{JobRegistry, NoJobRegistry};
use crate::monitor::ResourceMonitor;
use crate::reaper;
use crate::reconcile::{plan, CensusAction};
use crate::registry::{WorkerHandle, WorkerRegistry};
use crate::signals::{self, PoolSignal, SelfPipe};
use crate::worker::{self, WorkerFactory, WorkerSpec, DEFAULT_POOL_NAME};

/// Upper bound on one idle wait; the loop re-checks the world at least this
/// often even with no signals arriving.
const LOOP_SLEEP: Duration = Duration::from_secs(1);

type Hook = Arc<dyn Fn() + Send + Sync>;

/// What the loop does after dispatching one signal.
#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Break,
}

/// The worker-pool master.
///
/// Created with a config source and a worker factory, then driven with
/// [`start`](Pool::start) + [`join`](Pool::join) (or [`run`](Pool::run)).
pub struct Pool {
    source: ConfigSource,
    env: PoolEnv,
    name: String,
    factory: Arc<dyn WorkerFactory>,
    jobs: Arc<dyn JobRegistry>,
    after_prefork: Option<Hook>,
    on_reopen_logs: Option<Hook>,

    desired: DesiredCensus,
    registry: WorkerRegistry,
    monitor: ResourceMonitor,
    pipe: Option<SelfPipe>,
    master_pid: u32,
    hostname: String,
}

impl Pool {
    pub fn new(source: ConfigSource, factory: Arc<dyn WorkerFactory>) -> Self {
        procline::set_title("resque-pool-master: (initialized)");
        Self {
            source,
            env: PoolEnv::default(),
            name: DEFAULT_POOL_NAME.to_string(),
            factory,
            jobs: Arc::new(NoJobRegistry),
            after_prefork: None,
            on_reopen_logs: None,
            desired: DesiredCensus::new(),
            registry: WorkerRegistry::new(),
            monitor: ResourceMonitor::new(),
            pipe: None,
            master_pid: 0,
            hostname: procline::hostname(),
        }
    }

    /// Replace the environment-derived options (interval, verbosity,
    /// config-overlay name).
    pub fn with_env(mut self, env: PoolEnv) -> Self {
        self.env = env;
        self
    }

    /// Name the pool; appears in worker process titles.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Use a job registry for pre-kill diagnostics.
    pub fn with_job_registry(mut self, jobs: Arc<dyn JobRegistry>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Hook run once in every child after fork, before the worker starts
    /// (e.g. to reset connections inherited from a copy-on-write parent).
    pub fn after_prefork(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.after_prefork = Some(Arc::new(hook));
        self
    }

    /// Hook invoked on HUP so the embedder can reopen its log sinks.
    pub fn on_reopen_logs(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_reopen_logs = Some(Arc::new(hook));
        self
    }

    /// Load the config, install signal handling, and spawn the initial
    /// census. Config and fork errors propagate; the loop is not entered.
    pub fn start(&mut self) -> PoolResult<()> {
        info!("Starting pool master (pool: {})", self.name);
        self.master_pid = getpid().as_raw() as u32;
        self.master_procline("(starting)");

        let pipe = SelfPipe::new()?;
        signals::install()?;
        self.pipe = Some(pipe);

        self.desired = self.source.load(self.env.environment.as_deref())?;
        for (group, count) in &self.desired {
            info!("Pool config: {} => {}", group, count);
        }

        self.reconcile()?;
        self.master_procline("(started)");
        self.report_census();
        Ok(())
    }

    /// Drive the supervisor loop until QUIT/INT/TERM completes shutdown.
    pub fn join(&mut self) -> PoolResult<()> {
        loop {
            reaper::reap_opportunistic(&mut self.registry);
            let dropped = signals::intake().take_dropped();
            if dropped > 0 {
                warn!("Signal queue full: dropped {} signal(s)", dropped);
            }
            match signals::intake().pop() {
                Some(sig) => {
                    if self.dispatch(sig) == LoopAction::Break {
                        break;
                    }
                }
                None => {
                    self.sleep();
                    self.monitor.run(
                        Instant::now(),
                        &self.registry,
                        self.jobs.as_ref(),
                        &self.hostname,
                        self.master_pid,
                    );
                    if let Err(e) = self.reconcile() {
                        error!("Reconciliation failed: {}", e);
                    }
                }
            }
            self.update_procline();
        }
        self.master_procline("(shutting down)");
        info!("Pool master shut down");
        Ok(())
    }

    /// [`start`](Pool::start) then [`join`](Pool::join).
    pub fn run(&mut self) -> PoolResult<()> {
        self.start()?;
        self.join()
    }

    /// Enqueue a signal exactly as if the kernel had delivered it.
    pub fn enqueue(&self, sig: PoolSignal) {
        signals::intake().push(sig);
    }

    /// Live worker count across all groups.
    pub fn worker_count(&self) -> usize {
        self.registry.len()
    }

    /// Live worker count for one group.
    pub fn count_in(&self, group: &str) -> usize {
        self.registry.count_in(group)
    }

    /// Every live worker pid.
    pub fn all_pids(&self) -> Vec<u32> {
        self.registry.all_pids()
    }

    /// The census the reconciler is currently converging toward.
    pub fn desired_census(&self) -> &DesiredCensus {
        &self.desired
    }

    fn dispatch(&mut self, sig: PoolSignal) -> LoopAction {
        info!("Got {}", sig.name());
        match sig {
            // Operator signals pass straight through to every worker.
            PoolSignal::Usr1 | PoolSignal::Usr2 | PoolSignal::Cont => {
                self.forward_all(sig.os_signal());
                LoopAction::Continue
            }
            PoolSignal::Hup => {
                self.reload_config();
                if let Some(hook) = &self.on_reopen_logs {
                    hook();
                }
                // Current children hold the old log handles; cycle them all.
                // Replacements are spawned before the old generation is
                // reaped, so the census transiently overshoots.
                self.quit_all();
                if let Err(e) = self.reconcile() {
                    error!("Reconciliation after reload failed: {}", e);
                }
                LoopAction::Continue
            }
            PoolSignal::Winch => {
                info!("Draining all workers; master stays up");
                self.desired.clear();
                if let Err(e) = self.reconcile() {
                    error!("Reconciliation failed: {}", e);
                }
                LoopAction::Continue
            }
            PoolSignal::Quit => {
                self.quit_all();
                match reaper::reap_draining(&mut self.registry) {
                    Ok(()) => LoopAction::Break,
                    Err(PoolError::ReapInterrupted) => {
                        // The interrupting INT/TERM is already queued; let
                        // the next iteration escalate.
                        warn!("Graceful drain interrupted");
                        LoopAction::Continue
                    }
                    Err(e) => {
                        error!("Drain-reap failed: {}", e);
                        LoopAction::Break
                    }
                }
            }
            PoolSignal::Int => {
                self.quit_all();
                LoopAction::Break
            }
            PoolSignal::Term => {
                self.term_all();
                LoopAction::Break
            }
        }
    }

    fn reload_config(&mut self) {
        match self.source.load(self.env.environment.as_deref()) {
            Ok(desired) => {
                info!("Reloaded pool config ({} queue groups)", desired.len());
                self.desired = desired;
            }
            Err(e) => {
                // Startup config errors are fatal, but mid-flight the master
                // keeps the previous census rather than dying under HUP.
                error!("Config reload failed, keeping previous census: {}", e);
            }
        }
    }

    fn reconcile(&mut self) -> PoolResult<()> {
        let actions = plan(&self.desired, &self.registry, self.monitor.orphan_count());
        for action in actions {
            match action {
                CensusAction::Spawn { group, count } => {
                    for _ in 0..count {
                        self.spawn_worker(&group)?;
                    }
                }
                CensusAction::Quit { pids } => {
                    for pid in pids {
                        info!("Quitting excess worker {}", pid);
                        if let Err(e) = signal::quit(pid) {
                            debug!("{}", e);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_worker(&mut self, group: &str) -> PoolResult<u32> {
        let spec = WorkerSpec::new(
            group,
            self.env.interval,
            self.env.verbose,
            self.env.very_verbose,
            &self.name,
        );
        let Some(pipe) = self.pipe.as_ref() else {
            return Err(PoolError::config("cannot spawn before start"));
        };
        let forked = unsafe { fork() }.map_err(|e| PoolError::fork_failed(group, e.to_string()))?;
        match forked {
            ForkResult::Child => worker::run_child(
                self.factory.as_ref(),
                spec,
                self.master_pid,
                self.after_prefork.as_deref(),
                pipe,
            ),
            ForkResult::Parent { child } => {
                let pid = child.as_raw() as u32;
                self.registry.insert(WorkerHandle::new(
                    pid,
                    group,
                    spec.verbose,
                    spec.very_verbose,
                ));
                info!("Spawned worker {} for queues {}", pid, group);
                Ok(pid)
            }
        }
    }

    /// Sleep up to a second on self-pipe readability, then drain it.
    fn sleep(&self) {
        if let Some(pipe) = &self.pipe {
            if let Ok(true) = pipe.wait_readable(LOOP_SLEEP) {
                pipe.drain();
            }
        }
    }

    fn forward_all(&self, os_signal: Signal) {
        for pid in self.registry.all_pids() {
            if let Err(e) = signal::send(pid, os_signal) {
                debug!("{}", e);
            }
        }
    }

    fn quit_all(&self) {
        info!("Sending QUIT to {} worker(s)", self.registry.len());
        self.forward_all(Signal::SIGQUIT);
    }

    fn term_all(&self) {
        info!("Sending TERM to {} worker(s)", self.registry.len());
        self.forward_all(Signal::SIGTERM);
    }

    fn report_census(&self) {
        for group in self.registry.groups() {
            info!(
                "Group {}: {} worker(s) ({:?})",
                group,
                self.registry.count_in(group),
                self.registry.pids_of(group)
            );
        }
    }

    fn master_procline(&self, state: &str) {
        procline::set_title(&format!("resque-pool-master: {}", state));
    }

    fn update_procline(&self) {
        let pids: Vec<String> = self
            .registry
            .all_pids()
            .into_iter()
            .map(|pid| pid.to_string())
            .collect();
        self.master_procline(&format!("managing [{}]", pids.join(", ")));
    }
}
