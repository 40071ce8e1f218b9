//! Census reconciliation: desired vs. actual worker counts.
//!
//! Planning is pure so the arithmetic is testable without forking; the
//! [`Pool`](crate::pool::Pool) applies a plan by forking workers and
//! signalling excess ones.

use std::collections::BTreeSet;

use crate::config::DesiredCensus;
use crate::registry::WorkerRegistry;

/// One corrective step for a queue group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CensusAction {
    /// Fork `count` new workers for `group`.
    Spawn { group: String, count: usize },
    /// Gracefully quit these pids (oldest first).
    Quit { pids: Vec<u32> },
}

/// Compute the corrective actions for the current tick.
///
/// Over the union of configured and currently-populated groups, each group's
/// delta is `desired − actual − orphan_offset`, where the offset spreads the
/// detected-orphan count uniformly across groups (integer division). The
/// offset keeps dead-but-unreaped processes that still hold a slot
/// externally from causing spawn/kill thrash.
pub fn plan(
    desired: &DesiredCensus,
    registry: &WorkerRegistry,
    orphan_count: usize,
) -> Vec<CensusAction> {
    let groups: BTreeSet<&str> = desired
        .keys()
        .map(String::as_str)
        .chain(registry.groups())
        .collect();
    if groups.is_empty() {
        return Vec::new();
    }
    let orphan_offset = (orphan_count / groups.len()) as i64;

    let mut actions = Vec::new();
    for group in groups {
        let target = desired.get(group).copied().unwrap_or(0) as i64;
        let actual = registry.count_in(group) as i64;
        let delta = target - actual - orphan_offset;
        if delta > 0 {
            actions.push(CensusAction::Spawn {
                group: group.to_string(),
                count: delta as usize,
            });
        } else if delta < 0 {
            let excess = (-delta) as usize;
            let pids: Vec<u32> = registry
                .pids_of(group)
                .into_iter()
                .take(excess)
                .collect();
            if !pids.is_empty() {
                actions.push(CensusAction::Quit { pids });
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::WorkerHandle;

    fn registry_with(entries: &[(u32, &str)]) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for (pid, group) in entries {
            registry.insert(WorkerHandle::new(*pid, group, false, false));
        }
        registry
    }

    fn census(entries: &[(&str, usize)]) -> DesiredCensus {
        entries
            .iter()
            .map(|(group, count)| (group.to_string(), *count))
            .collect()
    }

    #[test]
    fn test_spawns_to_fill_deficit() {
        let desired = census(&[("high", 2), ("low", 1)]);
        let registry = WorkerRegistry::new();
        let actions = plan(&desired, &registry, 0);
        assert_eq!(
            actions,
            vec![
                CensusAction::Spawn {
                    group: "high".to_string(),
                    count: 2
                },
                CensusAction::Spawn {
                    group: "low".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn test_quits_excess_oldest_first() {
        let desired = census(&[("high", 1)]);
        let registry = registry_with(&[(10, "high"), (11, "high"), (12, "high")]);
        let actions = plan(&desired, &registry, 0);
        assert_eq!(actions, vec![CensusAction::Quit { pids: vec![10, 11] }]);
    }

    #[test]
    fn test_unconfigured_group_is_fully_drained() {
        let desired = DesiredCensus::new();
        let registry = registry_with(&[(10, "stale"), (11, "stale")]);
        let actions = plan(&desired, &registry, 0);
        assert_eq!(actions, vec![CensusAction::Quit { pids: vec![10, 11] }]);
    }

    #[test]
    fn test_orphan_offset_suppresses_spawn() {
        // desired 4, actual 3, one orphan over one group: delta = 0.
        let desired = census(&[("high", 4)]);
        let registry = registry_with(&[(10, "high"), (11, "high"), (12, "high")]);
        assert!(plan(&desired, &registry, 1).is_empty());
    }

    #[test]
    fn test_orphan_offset_uses_integer_division() {
        // Three orphans over two groups: offset 1 for each.
        let desired = census(&[("high", 2), ("low", 2)]);
        let registry = registry_with(&[(10, "high"), (20, "low")]);
        let actions = plan(&desired, &registry, 3);
        // delta = 2 - 1 - 1 = 0 for both groups: nothing to do.
        assert!(actions.is_empty());
    }

    #[test]
    fn test_no_groups_is_a_no_op() {
        // |G| = 0 with orphans present must not divide by zero.
        assert!(plan(&DesiredCensus::new(), &WorkerRegistry::new(), 7).is_empty());
    }

    #[test]
    fn test_orphan_offset_can_push_delta_negative() {
        let desired = census(&[("high", 1)]);
        let registry = registry_with(&[(10, "high")]);
        let actions = plan(&desired, &registry, 1);
        assert_eq!(actions, vec![CensusAction::Quit { pids: vec![10] }]);
    }

    #[test]
    fn test_quit_capped_at_group_population() {
        // delta −3 but only two workers present: quit both, no more.
        let desired = census(&[("high", 0)]);
        let registry = registry_with(&[(10, "high"), (11, "high")]);
        let actions = plan(&desired, &registry, 1);
        assert_eq!(actions, vec![CensusAction::Quit { pids: vec![10, 11] }]);
    }
}
