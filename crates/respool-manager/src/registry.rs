//! Bookkeeping of live worker children.

use std::collections::BTreeMap;

/// Immutable description of a forked worker child.
///
/// Created at fork time, removed when the child is reaped (or its forced
/// kill is confirmed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    /// Child process id.
    pub pid: u32,
    /// Queue group the worker serves, verbatim config key.
    pub group: String,
    /// Queue names, split on comma, order preserved.
    pub queues: Vec<String>,
    /// Worker verbose mode.
    pub verbose: bool,
    /// Worker very-verbose mode.
    pub very_verbose: bool,
}

impl WorkerHandle {
    pub fn new(pid: u32, group: &str, verbose: bool, very_verbose: bool) -> Self {
        Self {
            pid,
            group: group.to_string(),
            queues: split_queues(group),
            verbose,
            very_verbose,
        }
    }
}

/// Split a queue-group key into its queue names.
///
/// The group string is opaque as a key; only worker creation looks inside.
pub fn split_queues(group: &str) -> Vec<String> {
    group.split(',').map(str::to_string).collect()
}

/// Live children, grouped by queue group.
///
/// Inner vectors preserve insertion order: when the reconciler quits excess
/// workers it targets the first (oldest) pids of a group. A pid lives in
/// exactly one group by construction; `remove` scans groups and stops at the
/// first hit. Group entries disappear when their last worker is removed, so
/// `groups()` is always the set of currently-populated groups.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    groups: BTreeMap<String, Vec<WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly-forked worker.
    pub fn insert(&mut self, handle: WorkerHandle) {
        self.groups.entry(handle.group.clone()).or_default().push(handle);
    }

    /// Remove a worker by pid, whichever group it is in.
    pub fn remove(&mut self, pid: u32) -> Option<WorkerHandle> {
        let mut removed = None;
        let mut emptied = None;
        for (group, workers) in self.groups.iter_mut() {
            if let Some(index) = workers.iter().position(|w| w.pid == pid) {
                removed = Some(workers.remove(index));
                if workers.is_empty() {
                    emptied = Some(group.clone());
                }
                break;
            }
        }
        if let Some(group) = emptied {
            self.groups.remove(&group);
        }
        removed
    }

    /// Pids of a group, insertion order.
    pub fn pids_of(&self, group: &str) -> Vec<u32> {
        self.groups
            .get(group)
            .map(|workers| workers.iter().map(|w| w.pid).collect())
            .unwrap_or_default()
    }

    /// Every live pid, grouped-then-insertion order.
    pub fn all_pids(&self) -> Vec<u32> {
        self.groups
            .values()
            .flat_map(|workers| workers.iter().map(|w| w.pid))
            .collect()
    }

    /// Worker count in a group.
    pub fn count_in(&self, group: &str) -> usize {
        self.groups.get(group).map(Vec::len).unwrap_or(0)
    }

    /// Currently-populated groups.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Every live worker handle.
    pub fn handles(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.groups.values().flatten()
    }

    /// Whether a pid is one of ours.
    pub fn contains(&self, pid: u32) -> bool {
        self.handles().any(|w| w.pid == pid)
    }

    /// Total live worker count.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(pid: u32, group: &str) -> WorkerHandle {
        WorkerHandle::new(pid, group, false, false)
    }

    #[test]
    fn test_split_queues_preserves_order() {
        assert_eq!(split_queues("high,low"), vec!["high", "low"]);
        assert_eq!(split_queues("solo"), vec!["solo"]);
    }

    #[test]
    fn test_insert_and_count() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(10, "high"));
        registry.insert(handle(11, "high"));
        registry.insert(handle(12, "low"));

        assert_eq!(registry.count_in("high"), 2);
        assert_eq!(registry.count_in("low"), 1);
        assert_eq!(registry.count_in("missing"), 0);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.all_pids().len(), 3);
    }

    #[test]
    fn test_pids_preserve_insertion_order() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(30, "high"));
        registry.insert(handle(20, "high"));
        registry.insert(handle(25, "high"));
        assert_eq!(registry.pids_of("high"), vec![30, 20, 25]);
    }

    #[test]
    fn test_remove_scans_all_groups() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(10, "high"));
        registry.insert(handle(12, "low"));

        let removed = registry.remove(12).expect("pid 12 is registered");
        assert_eq!(removed.group, "low");
        assert!(registry.remove(12).is_none());
        assert!(registry.contains(10));
    }

    #[test]
    fn test_emptied_group_disappears() {
        let mut registry = WorkerRegistry::new();
        registry.insert(handle(10, "high"));
        registry.remove(10);
        assert!(registry.is_empty());
        assert_eq!(registry.groups().count(), 0);
    }

    #[test]
    fn test_handle_splits_group_into_queues() {
        let worker = handle(10, "high,low");
        assert_eq!(worker.queues, vec!["high", "low"]);
        assert_eq!(worker.group, "high,low");
    }
}
