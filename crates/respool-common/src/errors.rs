//! Error types for the respool supervisor.

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;

/// Main error type for the worker-pool supervisor.
///
/// The supervisor's error policy is deliberately narrow: the master exits
/// only on QUIT/INT/TERM or on unrecoverable configuration/fork errors at
/// startup. Everything else is logged and absorbed by the loop, so most
/// variants here surface exactly once, at a well-known boundary.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Pool configuration could not be read or parsed.
    #[error("Config error: {reason}")]
    Config { reason: String },

    /// Forking a worker for a queue group failed.
    ///
    /// No registry entry is recorded for a failed fork; the census stays
    /// consistent and the next reconciliation retries.
    #[error("Fork failed for queue group '{group}': {reason}")]
    ForkFailed { group: String, reason: String },

    /// Sending a signal to a child failed.
    #[error("Failed to send {signal} to worker {pid}: {reason}")]
    SignalFailed {
        pid: u32,
        signal: String,
        reason: String,
    },

    /// A blocking drain-reap was unwound by a pending INT/TERM.
    ///
    /// This is a control-flow token, not a failure: it is raised from inside
    /// the interruptible wait and caught only at the supervisor loop
    /// boundary, where the queued signal takes over.
    #[error("Reap interrupted by pending shutdown signal")]
    ReapInterrupted,

    /// A worker's polling loop returned an error (child-side only).
    #[error("Worker failed: {reason}")]
    Worker { reason: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Creates a Config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Creates a ForkFailed error.
    pub fn fork_failed(group: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ForkFailed {
            group: group.into(),
            reason: reason.into(),
        }
    }

    /// Creates a SignalFailed error.
    pub fn signal_failed(pid: u32, signal: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            pid,
            signal: signal.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Worker error.
    pub fn worker(reason: impl Into<String>) -> Self {
        Self::Worker {
            reason: reason.into(),
        }
    }

    /// True for the drain-reap control token.
    pub fn is_reap_interrupted(&self) -> bool {
        matches!(self, Self::ReapInterrupted)
    }
}
