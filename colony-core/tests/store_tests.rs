//! Record store error-message and atomic-write-safety integration tests.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use assert_fs::prelude::*;
use chrono::Utc;
use colony_core::{
    types::{ProcessRecord, WorkerName},
    RecordStore, StoreError,
};
use predicates::prelude::predicate;

fn record(name: &str, pid: u32) -> ProcessRecord {
    ProcessRecord {
        name: WorkerName::from(name),
        pid,
        started_at: Utc::now(),
        command: vec!["sleep".into(), "100".into()],
        log_path: PathBuf::from(format!("/tmp/{name}.log")),
    }
}

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn corrupt_store_error_names_the_file() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("records.yaml");
    fs::write(&path, b"workers: [not, a, map").expect("write");

    let err = RecordStore::open(path).unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("records.yaml"));
}

#[test]
fn unreadable_directory_is_io_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    // Point the store at a path whose "file" is actually a directory.
    let path = home.path().join("records.yaml");
    fs::create_dir_all(&path).expect("mkdir");

    let err = RecordStore::open(path).unwrap_err();
    assert!(matches!(err, StoreError::Io(_)), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Atomic write safety
// ---------------------------------------------------------------------------

#[test]
fn interrupted_write_leaves_previous_state_readable() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("run").join("records.yaml");

    let mut store = RecordStore::open(path.clone()).expect("open");
    store.insert(record("relay", 100)).expect("insert");

    // Simulate a crash mid-write: a leftover .tmp next to a good file.
    let tmp = path.with_file_name("records.yaml.tmp");
    fs::write(&tmp, b"relay: {garbage").expect("write tmp");

    // The real file is untouched; reopening sees the pre-crash state.
    let reopened = RecordStore::open(path).expect("reopen");
    assert_eq!(reopened.len(), 1);
    assert_eq!(
        reopened.get(&WorkerName::from("relay")).map(|r| r.pid),
        Some(100)
    );
}

#[test]
fn every_mutation_is_immediately_durable() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join("records.yaml");

    let mut store = RecordStore::open(path.clone()).expect("open");
    store.insert(record("relay", 100)).expect("insert");

    // A fresh reader (as after a controller crash) sees the record with
    // no explicit flush/close step.
    let on_disk: BTreeMap<WorkerName, ProcessRecord> =
        serde_yaml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    assert_eq!(on_disk.len(), 1);

    store.remove(&WorkerName::from("relay")).expect("remove");
    let on_disk: BTreeMap<WorkerName, ProcessRecord> =
        serde_yaml::from_str(&fs::read_to_string(&path).expect("read")).expect("parse");
    assert!(on_disk.is_empty());
}

// ---------------------------------------------------------------------------
// 3. File layout
// ---------------------------------------------------------------------------

#[test]
fn store_file_created_under_requested_directory() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let path = home.path().join(".colony").join("run").join("records.yaml");

    let mut store = RecordStore::open(path).expect("open");
    store.insert(record("relay", 100)).expect("insert");

    home.child(".colony/run/records.yaml")
        .assert(predicate::path::exists());
}
