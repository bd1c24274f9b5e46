//! CLI surface tests that do not need a running daemon.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn colony(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("colony").expect("binary");
    cmd.env("HOME", home.path());
    cmd
}

#[test]
fn status_without_daemon_reports_not_running() {
    let home = TempDir::new().expect("home");
    colony(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon is not running"));
}

#[test]
fn status_json_without_daemon_is_machine_readable() {
    let home = TempDir::new().expect("home");
    let output = colony(&home)
        .args(["status", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let payload: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    assert_eq!(payload["daemon"]["running"], serde_json::json!(false));
    assert!(payload["workers"].as_array().expect("array").is_empty());
}

#[test]
fn down_without_daemon_is_quiet_success() {
    let home = TempDir::new().expect("home");
    colony(&home)
        .arg("down")
        .assert()
        .success()
        .stdout(predicate::str::contains("not running"));
}

#[test]
fn logs_requires_a_target() {
    let home = TempDir::new().expect("home");
    colony(&home)
        .arg("logs")
        .assert()
        .failure()
        .stderr(predicate::str::contains("specify a worker name"));
}

#[test]
fn logs_daemon_tails_the_daemon_log_file() {
    let home = TempDir::new().expect("home");
    let logs_dir = home.path().join(".colony").join("logs");
    std::fs::create_dir_all(&logs_dir).expect("logs dir");
    std::fs::write(logs_dir.join("daemon.log"), "startup reconciliation done\n").expect("write");

    colony(&home)
        .args(["logs", "--daemon"])
        .assert()
        .success()
        .stdout(predicate::str::contains("startup reconciliation done"));
}

#[test]
fn logs_for_unknown_worker_points_at_missing_sink() {
    let home = TempDir::new().expect("home");
    colony(&home)
        .args(["logs", "ghost"])
        .assert()
        .success()
        .stdout(predicate::str::contains("log file not found"));
}

#[test]
fn help_lists_all_subcommands() {
    let home = TempDir::new().expect("home");
    colony(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("up")
                .and(predicate::str::contains("reconcile"))
                .and(predicate::str::contains("doctor"))
                .and(predicate::str::contains("stop-all")),
        );
}
