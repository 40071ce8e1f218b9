//! Collection of terminated worker children.
//!
//! Two modes: opportunistic (never blocks, runs at the top of every loop
//! iteration so the registry never carries zombies into a reconciliation)
//! and draining (blocks until no children remain, used by QUIT shutdown,
//! unwound by a pending INT/TERM via the interrupt-reap flag).

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use respool_common::{PoolError, PoolResult};
use tracing::{debug, info, warn};

use crate::registry::WorkerRegistry;
use crate::signals;

/// Collect every already-terminated child without blocking.
pub fn reap_opportunistic(registry: &mut WorkerRegistry) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    note_exit(registry, pid.as_raw() as u32, &status);
                }
            }
            Err(Errno::EINTR) => continue,
            // No children: benign.
            Err(Errno::ECHILD) => break,
            Err(e) => {
                warn!("waitpid failed: {}", e);
                break;
            }
        }
    }
}

/// Block until no children remain, collecting each.
///
/// Returns [`PoolError::ReapInterrupted`] when an INT/TERM arrives during
/// the wait; the caller re-enters the loop and the queued signal escalates
/// the shutdown.
pub fn reap_draining(registry: &mut WorkerRegistry) -> PoolResult<()> {
    signals::begin_drain_reap();
    let result = loop {
        match waitpid(Pid::from_raw(-1), None) {
            Ok(status) => {
                if let Some(pid) = status.pid() {
                    note_exit(registry, pid.as_raw() as u32, &status);
                }
            }
            Err(Errno::EINTR) => {
                if signals::reap_interrupted() {
                    break Err(PoolError::ReapInterrupted);
                }
            }
            Err(Errno::ECHILD) => break Ok(()),
            Err(e) => break Err(std::io::Error::from(e).into()),
        }
    };
    signals::end_drain_reap();
    result
}

/// Registry cleanup and status logging for one collected child.
fn note_exit(registry: &mut WorkerRegistry, pid: u32, status: &WaitStatus) {
    match registry.remove(pid) {
        Some(worker) => info!(
            "Reaped worker {} (queues: {}, {})",
            pid,
            worker.queues.join(","),
            describe(status)
        ),
        None => debug!("Reaped untracked child {} ({})", pid, describe(status)),
    }
}

fn describe(status: &WaitStatus) -> String {
    match status {
        WaitStatus::Exited(_, code) => format!("exit status {}", code),
        WaitStatus::Signaled(_, signal, _) => format!("killed by {}", signal),
        other => format!("{:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerHandle;
    use nix::sys::signal::Signal;
    use nix::unistd::Pid;

    #[test]
    fn test_note_exit_removes_worker_from_registry() {
        let mut registry = WorkerRegistry::new();
        registry.insert(WorkerHandle::new(123, "high,low", false, false));

        let status = WaitStatus::Exited(Pid::from_raw(123), 0);
        note_exit(&mut registry, 123, &status);
        assert!(registry.is_empty());

        // Untracked pids are a quiet no-op.
        note_exit(&mut registry, 999, &status);
    }

    #[test]
    fn test_describe_statuses() {
        let exited = WaitStatus::Exited(Pid::from_raw(1), 2);
        assert_eq!(describe(&exited), "exit status 2");

        let signaled = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGQUIT, false);
        assert_eq!(describe(&signaled), "killed by SIGQUIT");
    }

    #[test]
    fn test_opportunistic_reap_collects_exited_child() {
        let mut registry = WorkerRegistry::new();
        let child = std::process::Command::new("true")
            .spawn()
            .expect("spawn true");
        registry.insert(WorkerHandle::new(child.id(), "itest", false, false));

        // Give the child a moment to exit, then collect it.
        std::thread::sleep(std::time::Duration::from_millis(200));
        reap_opportunistic(&mut registry);
        assert!(!registry.contains(child.id()));
    }
}
