//! End-to-end reconcile → apply tests with a real supervisor.

#![cfg(unix)]

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use colony_core::{RecordStore, WorkerName, WorkerSpec};
use colony_reconcile::{apply, compute};
use colony_supervisor::Supervisor;
use tempfile::TempDir;

const STOP_TIMEOUT: Duration = Duration::from_secs(2);

fn make_supervisor(home: &TempDir) -> Supervisor {
    let store = RecordStore::open(home.path().join("run").join("records.yaml")).expect("store");
    Supervisor::new(store, home.path().join("logs"))
}

fn sleeper(name: &str) -> WorkerSpec {
    WorkerSpec {
        name: WorkerName::from(name),
        command: "sleep".into(),
        args: vec!["100".into()],
        env: BTreeMap::new(),
        tags: BTreeSet::new(),
    }
}

fn tracked_of(supervisor: &Supervisor, specs: &[WorkerSpec]) -> (BTreeSet<WorkerName>, BTreeMap<WorkerName, WorkerSpec>) {
    let running: BTreeSet<WorkerName> = supervisor.store().names().into_iter().collect();
    let tracked = specs
        .iter()
        .filter(|s| running.contains(&s.name))
        .map(|s| (s.name.clone(), s.clone()))
        .collect();
    (running, tracked)
}

#[tokio::test]
async fn converge_up_then_down_to_empty() {
    let home = TempDir::new().expect("home");
    let mut supervisor = make_supervisor(&home);

    // Scenario: [] -> [w1] -> []
    let desired = vec![sleeper("w1")];
    let plan = compute(&desired, &BTreeSet::new(), &BTreeMap::new());
    assert_eq!(plan.to_start.len(), 1);
    let report = apply(&plan, &mut supervisor, STOP_TIMEOUT).await;
    assert!(report.is_clean(), "{:?}", report.errors);
    assert_eq!(supervisor.store().len(), 1);

    let (running, tracked) = tracked_of(&supervisor, &desired);
    let plan = compute(&[], &running, &tracked);
    assert_eq!(plan.to_stop, vec![WorkerName::from("w1")]);
    assert!(plan.to_start.is_empty() && plan.to_restart.is_empty());

    let report = apply(&plan, &mut supervisor, STOP_TIMEOUT).await;
    assert!(report.is_clean(), "{:?}", report.errors);
    assert!(supervisor.store().is_empty(), "zero workers tracked afterward");
}

#[tokio::test]
async fn reapplying_same_set_is_a_no_op() {
    let home = TempDir::new().expect("home");
    let mut supervisor = make_supervisor(&home);

    let desired = vec![sleeper("w1"), sleeper("w2")];
    let plan = compute(&desired, &BTreeSet::new(), &BTreeMap::new());
    apply(&plan, &mut supervisor, STOP_TIMEOUT).await;

    let before: Vec<u32> = supervisor.store().snapshot().values().map(|r| r.pid).collect();

    let (running, tracked) = tracked_of(&supervisor, &desired);
    let plan = compute(&desired, &running, &tracked);
    assert!(plan.is_empty(), "same desired set must produce an empty plan");

    let report = apply(&plan, &mut supervisor, STOP_TIMEOUT).await;
    assert!(report.is_clean());
    let after: Vec<u32> = supervisor.store().snapshot().values().map(|r| r.pid).collect();
    assert_eq!(before, after, "no worker may be touched by an empty plan");

    supervisor.stop_all(STOP_TIMEOUT).await;
}

#[tokio::test]
async fn changed_spec_stops_before_starting_replacement() {
    let home = TempDir::new().expect("home");
    let mut supervisor = make_supervisor(&home);

    let original = vec![sleeper("w1")];
    let plan = compute(&original, &BTreeSet::new(), &BTreeMap::new());
    apply(&plan, &mut supervisor, STOP_TIMEOUT).await;
    let old_pid = supervisor
        .store()
        .get(&WorkerName::from("w1"))
        .map(|r| r.pid)
        .expect("record");

    // Same name, different args: a restart item, applied stop-then-start.
    let mut changed = sleeper("w1");
    changed.args = vec!["200".into()];
    let (running, tracked) = tracked_of(&supervisor, &original);
    let plan = compute(&[changed.clone()], &running, &tracked);
    assert_eq!(plan.to_restart, vec![changed]);

    let report = apply(&plan, &mut supervisor, STOP_TIMEOUT).await;
    assert!(report.is_clean(), "{:?}", report.errors);

    let new_record = supervisor
        .store()
        .get(&WorkerName::from("w1"))
        .cloned()
        .expect("record");
    assert_ne!(new_record.pid, old_pid, "replacement must be a new process");
    assert_eq!(new_record.command, vec!["sleep", "200"]);
    assert!(
        !colony_supervisor::is_pid_alive(old_pid),
        "old instance must be stopped before the new one exists"
    );

    supervisor.stop_all(STOP_TIMEOUT).await;
}

#[tokio::test]
async fn one_bad_spec_does_not_abort_the_rest() {
    let home = TempDir::new().expect("home");
    let mut supervisor = make_supervisor(&home);

    let mut broken = sleeper("broken");
    broken.command = "definitely-not-a-real-command-xyz".into();
    let desired = vec![broken, sleeper("good")];

    let plan = compute(&desired, &BTreeSet::new(), &BTreeMap::new());
    let report = apply(&plan, &mut supervisor, STOP_TIMEOUT).await;

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].name, WorkerName::from("broken"));
    assert_eq!(report.started, vec![WorkerName::from("good")]);
    assert!(supervisor.is_running(&WorkerName::from("good")));

    // Next reconcile retries only the outstanding difference.
    let (running, tracked) = tracked_of(&supervisor, &desired);
    let plan = compute(&desired, &running, &tracked);
    assert_eq!(plan.to_start.len(), 1);
    assert_eq!(plan.to_start[0].name, WorkerName::from("broken"));
    assert!(plan.to_stop.is_empty() && plan.to_restart.is_empty());

    supervisor.stop_all(STOP_TIMEOUT).await;
}
