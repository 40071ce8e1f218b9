//! Process existence checking.

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;

/// Check whether a process with the given PID is still alive.
///
/// Uses `kill(pid, 0)`, which delivers no signal but reports whether the
/// process exists. `EPERM` means the process exists but belongs to someone
/// else, so it counts as alive; any other error counts as gone. This is the
/// permissive reading the supervisor wants: a pid we cannot interrogate must
/// not be treated as a free slot.
pub fn process_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
