//! Process-table interrogation.
//!
//! A [`ProcessTable`] is a point-in-time snapshot of the system process
//! table, taken once per monitoring sweep. The supervisor uses it for two
//! things: finding a worker's immediate children (workers fork a grandchild
//! per job), and walking the job family for orphan detection.

use std::collections::HashSet;

use sysinfo::{ProcessRefreshKind, RefreshKind, System};

/// Snapshot of the system process table.
pub struct ProcessTable {
    system: System,
}

impl ProcessTable {
    /// Take a fresh snapshot.
    pub fn snapshot() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::new().with_processes(ProcessRefreshKind::new()),
        );
        Self { system }
    }

    /// PIDs of the immediate children of `pid`, ascending.
    pub fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .system
            .processes()
            .iter()
            .filter(|(_, proc_)| proc_.parent().map(|p| p.as_u32()) == Some(pid))
            .map(|(child, _)| child.as_u32())
            .collect();
        children.sort_unstable();
        children
    }

    /// PIDs of every process whose command name starts with `comm_prefix`.
    ///
    /// The kernel comm name is at most 15 bytes, so callers must pass a
    /// prefix that survives that truncation.
    pub fn family(&self, comm_prefix: &str) -> HashSet<u32> {
        self.system
            .processes()
            .iter()
            .filter(|(_, proc_)| proc_.name().starts_with(comm_prefix))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    /// Parent PID of `pid`, if the process is in the snapshot.
    pub fn parent_of(&self, pid: u32) -> Option<u32> {
        self.system
            .processes()
            .get(&sysinfo::Pid::from_u32(pid))
            .and_then(|proc_| proc_.parent())
            .map(|p| p.as_u32())
    }

    /// Whether `pid` appears in the snapshot.
    pub fn contains(&self, pid: u32) -> bool {
        self.system
            .processes()
            .contains_key(&sysinfo::Pid::from_u32(pid))
    }
}
