//! Pure reconciliation-plan computation.

use std::collections::{BTreeMap, BTreeSet};

use colony_core::{WorkerName, WorkerSpec};

/// Diff between the tracked worker set and a desired spec set.
///
/// The three lists are disjoint by construction and sorted by name. A
/// plan is a pure value computed from two snapshots; applying it is the
/// only mutating step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconciliationPlan {
    /// Desired names with no current record.
    pub to_start: Vec<WorkerSpec>,
    /// Tracked names absent from the desired set.
    pub to_stop: Vec<WorkerName>,
    /// Tracked names whose spec changed by value (stop-then-start).
    pub to_restart: Vec<WorkerSpec>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.to_start.is_empty() && self.to_stop.is_empty() && self.to_restart.is_empty()
    }

    /// Total number of plan items.
    pub fn len(&self) -> usize {
        self.to_start.len() + self.to_stop.len() + self.to_restart.len()
    }
}

/// Compute the plan for converging to `desired`.
///
/// `running` is the name set currently in the record store; `tracked`
/// maps those names to the specs they were last started with. A running
/// name whose previous spec is unknown (controller restarted mid-flight)
/// is conservatively treated as changed.
pub fn compute(
    desired: &[WorkerSpec],
    running: &BTreeSet<WorkerName>,
    tracked: &BTreeMap<WorkerName, WorkerSpec>,
) -> ReconciliationPlan {
    let mut plan = ReconciliationPlan::default();

    let desired_by_name: BTreeMap<&WorkerName, &WorkerSpec> =
        desired.iter().map(|spec| (&spec.name, spec)).collect();

    for (name, spec) in &desired_by_name {
        if !running.contains(name) {
            plan.to_start.push((*spec).clone());
        } else if tracked.get(name) != Some(spec) {
            plan.to_restart.push((*spec).clone());
        }
    }

    for name in running {
        if !desired_by_name.contains_key(name) {
            plan.to_stop.push(name.clone());
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, command: &str) -> WorkerSpec {
        WorkerSpec {
            name: WorkerName::from(name),
            command: command.to_string(),
            args: vec![],
            env: BTreeMap::new(),
            tags: BTreeSet::new(),
        }
    }

    fn tracked_from(specs: &[WorkerSpec]) -> (BTreeSet<WorkerName>, BTreeMap<WorkerName, WorkerSpec>) {
        let running = specs.iter().map(|s| s.name.clone()).collect();
        let tracked = specs.iter().map(|s| (s.name.clone(), s.clone())).collect();
        (running, tracked)
    }

    #[test]
    fn empty_to_empty_is_empty_plan() {
        let plan = compute(&[], &BTreeSet::new(), &BTreeMap::new());
        assert!(plan.is_empty());
    }

    #[test]
    fn same_set_twice_is_empty_plan() {
        let desired = vec![spec("w1", "sleep"), spec("w2", "sleep")];
        let (running, tracked) = tracked_from(&desired);
        let plan = compute(&desired, &running, &tracked);
        assert!(plan.is_empty(), "idempotent reconcile must be a no-op: {plan:?}");
    }

    #[test]
    fn new_name_is_to_start() {
        let desired = vec![spec("w1", "sleep")];
        let plan = compute(&desired, &BTreeSet::new(), &BTreeMap::new());
        assert_eq!(plan.to_start, desired);
        assert!(plan.to_stop.is_empty());
        assert!(plan.to_restart.is_empty());
    }

    #[test]
    fn removed_name_is_to_stop() {
        let current = vec![spec("w1", "sleep")];
        let (running, tracked) = tracked_from(&current);
        let plan = compute(&[], &running, &tracked);
        assert_eq!(plan.to_stop, vec![WorkerName::from("w1")]);
        assert!(plan.to_start.is_empty());
    }

    #[test]
    fn changed_spec_is_to_restart_not_start_plus_stop() {
        let current = vec![spec("w1", "python2")];
        let (running, tracked) = tracked_from(&current);
        let desired = vec![spec("w1", "python3")];

        let plan = compute(&desired, &running, &tracked);
        assert_eq!(plan.to_restart, desired);
        assert!(plan.to_start.is_empty());
        assert!(plan.to_stop.is_empty());
    }

    #[test]
    fn unknown_previous_spec_is_conservatively_restarted() {
        let desired = vec![spec("w1", "sleep")];
        let running: BTreeSet<WorkerName> = [WorkerName::from("w1")].into();
        // Running but no tracked spec (controller restart mid-flight).
        let plan = compute(&desired, &running, &BTreeMap::new());
        assert_eq!(plan.to_restart, desired);
    }

    #[test]
    fn lists_are_disjoint_and_sorted() {
        let current = vec![spec("a", "old"), spec("b", "sleep"), spec("c", "sleep")];
        let (running, tracked) = tracked_from(&current);
        let desired = vec![spec("d", "sleep"), spec("a", "new"), spec("b", "sleep")];

        let plan = compute(&desired, &running, &tracked);
        assert_eq!(plan.to_start.iter().map(|s| s.name.0.as_str()).collect::<Vec<_>>(), ["d"]);
        assert_eq!(plan.to_restart.iter().map(|s| s.name.0.as_str()).collect::<Vec<_>>(), ["a"]);
        assert_eq!(plan.to_stop, vec![WorkerName::from("c")]);
        assert_eq!(plan.len(), 3);
    }
}
