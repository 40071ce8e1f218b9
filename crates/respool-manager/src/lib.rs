//! # Respool Manager
//!
//! A worker-pool supervisor for background-job processing: a long-lived
//! master that forks, monitors, and reaps a fleet of job workers, each
//! bound to a set of named queues.
//!
//! This crate provides:
//! - Signal-driven census reconciliation (spawn to fill deficits, QUIT to
//!   drain excess, with orphan compensation)
//! - Crash-safe reaping (opportunistic every iteration, blocking drain on
//!   QUIT, interruptible by INT/TERM)
//! - Memory-based eviction with TERM→KILL escalation and orphan detection
//! - Config reload on HUP, full drain on WINCH, signal forwarding on
//!   USR1/USR2/CONT
//!
//! The master is single-threaded and cooperative: signal handlers only
//! enqueue into a bounded buffer and wake the loop through a self-pipe;
//! everything else runs on the loop thread.
//!
//! Embedders supply the actual job worker through [`WorkerFactory`]:
//!
//! ```no_run
//! use std::sync::Arc;
//! use respool_manager::{ConfigSource, IdleWorkerFactory, Pool, PoolEnv};
//!
//! let source = ConfigSource::discover().expect("no pool config found");
//! let mut pool = Pool::new(source, Arc::new(IdleWorkerFactory))
//!     .with_env(PoolEnv::from_env());
//! pool.run().expect("pool failed");
//! ```

pub mod config;
pub mod jobs;
pub mod monitor;
pub mod pool;
pub mod reaper;
pub mod reconcile;
pub mod registry;
pub mod signals;
pub mod worker;

pub use config::{ConfigSource, DesiredCensus, PoolEnv, DEFAULT_INTERVAL};
pub use jobs::{JobRegistry, JobSnapshot, NoJobRegistry};
pub use monitor::{ResourceMonitor, MEM_QUIT_THRESHOLD_MB, MEM_TERM_THRESHOLD_MB};
pub use pool::Pool;
pub use registry::{WorkerHandle, WorkerRegistry};
pub use signals::{PoolSignal, SIGNAL_QUEUE_CAP};
pub use worker::{
    IdleWorker, IdleWorkerFactory, Worker, WorkerContext, WorkerFactory, WorkerSpec,
};
