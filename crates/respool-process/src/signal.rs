//! Signal delivery to worker processes.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use respool_common::{PoolError, PoolResult};

/// Send an arbitrary signal to a process.
pub fn send(pid: u32, signal: Signal) -> PoolResult<()> {
    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| PoolError::signal_failed(pid, signal.as_str(), e.to_string()))
}

/// Ask a worker to finish its current job and exit (SIGQUIT).
pub fn quit(pid: u32) -> PoolResult<()> {
    send(pid, Signal::SIGQUIT)
}

/// Ask a worker to stop now (SIGTERM).
pub fn term(pid: u32) -> PoolResult<()> {
    send(pid, Signal::SIGTERM)
}

/// Kill a worker unconditionally (SIGKILL).
pub fn kill_hard(pid: u32) -> PoolResult<()> {
    send(pid, Signal::SIGKILL)
}
