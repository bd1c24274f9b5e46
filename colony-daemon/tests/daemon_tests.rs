//! End-to-end daemon tests: full runtime, real socket, real workers.

#![cfg(unix)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use colony_daemon::paths::{colony_root, config_path, records_path, socket_path};
use colony_daemon::protocol::{
    request_doctor, request_list, request_reconcile, request_shutdown, request_status,
    request_stop_worker,
};
use colony_daemon::runtime;
use tempfile::TempDir;

fn write_config(home: &Path, workers: &[(&str, &str, &[&str])]) {
    fs::create_dir_all(colony_root(home)).expect("root dir");
    let mut yaml = if workers.is_empty() {
        String::from("workers: []\n")
    } else {
        String::from("workers:\n")
    };
    for (name, command, args) in workers {
        yaml.push_str(&format!("  - name: {name}\n    command: {command}\n"));
        if !args.is_empty() {
            yaml.push_str(&format!("    args: [{}]\n", args.join(", ")));
        }
    }
    yaml.push_str("monitor:\n  sweep_interval_secs: 1\n  stop_timeout_secs: 1\n");
    fs::write(config_path(home), yaml).expect("write config");
}

async fn wait_for_socket(home: &Path) {
    let socket = socket_path(home);
    for _ in 0..100 {
        if socket.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("daemon socket never appeared at {}", socket.display());
}

async fn on_client<T, F>(home: &Path, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce(PathBuf) -> T + Send + 'static,
{
    let home = home.to_path_buf();
    tokio::task::spawn_blocking(move || f(home))
        .await
        .expect("client join")
}

#[tokio::test(flavor = "multi_thread")]
async fn daemon_lifecycle_over_the_socket() {
    let dir = TempDir::new().expect("home");
    let home = dir.path().to_path_buf();
    write_config(&home, &[("one", "sleep", &["100"])]);

    let daemon = tokio::spawn(runtime::run(home.clone()));
    wait_for_socket(&home).await;

    // Startup reconciliation brought up the configured worker.
    let status = on_client(&home, |home| request_status(&home)).await.expect("status");
    assert_eq!(status["running"], serde_json::json!(true));
    assert_eq!(status["workers"], serde_json::json!(1));

    let list = on_client(&home, |home| request_list(&home)).await.expect("list");
    let workers = list["workers"].as_array().expect("workers").clone();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["name"], serde_json::json!("one"));
    let pid = workers[0]["pid"].as_u64().expect("pid") as u32;
    assert!(colony_supervisor::is_pid_alive(pid));

    // Grow the desired set, reconcile over the socket.
    write_config(&home, &[("one", "sleep", &["100"]), ("two", "sleep", &["100"])]);
    let summary = on_client(&home, |home| request_reconcile(&home)).await.expect("reconcile");
    assert_eq!(summary["started"], serde_json::json!(["two"]));

    let list = on_client(&home, |home| request_list(&home)).await.expect("list");
    assert_eq!(list["workers"].as_array().expect("workers").len(), 2);

    // Stop one by name; the other keeps running.
    on_client(&home, |home| request_stop_worker(&home, "two")).await.expect("stop");
    let list = on_client(&home, |home| request_list(&home)).await.expect("list");
    let workers = list["workers"].as_array().expect("workers").clone();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["name"], serde_json::json!("one"));

    let doctor = on_client(&home, |home| request_doctor(&home)).await.expect("doctor");
    assert_eq!(doctor["tracked_workers"], serde_json::json!(1));

    // Shutdown takes the remaining worker down with the daemon.
    on_client(&home, |home| request_shutdown(&home)).await.expect("shutdown");
    tokio::time::timeout(Duration::from_secs(30), daemon)
        .await
        .expect("daemon exit in time")
        .expect("join")
        .expect("clean exit");

    assert!(!colony_supervisor::is_pid_alive(pid), "workers must not outlive the daemon");
    assert!(!socket_path(&home).exists(), "socket cleaned up on exit");
}

#[tokio::test(flavor = "multi_thread")]
async fn config_edit_triggers_reconciliation() {
    let dir = TempDir::new().expect("home");
    let home = dir.path().to_path_buf();
    write_config(&home, &[]);

    let daemon = tokio::spawn(runtime::run(home.clone()));
    wait_for_socket(&home).await;

    // Edit the config file on disk; the watcher should converge to it
    // without any socket command.
    write_config(&home, &[("hot", "sleep", &["100"])]);

    let mut adopted = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let list = on_client(&home, |home| request_list(&home)).await.expect("list");
        let workers = list["workers"].as_array().expect("workers").clone();
        if workers.len() == 1 && workers[0]["name"] == serde_json::json!("hot") {
            adopted = true;
            break;
        }
    }
    assert!(adopted, "watcher never applied the edited configuration");

    on_client(&home, |home| request_shutdown(&home)).await.expect("shutdown");
    tokio::time::timeout(Duration::from_secs(30), daemon)
        .await
        .expect("daemon exit in time")
        .expect("join")
        .expect("clean exit");
}

#[tokio::test(flavor = "multi_thread")]
async fn records_survive_on_disk_across_mutations() {
    let dir = TempDir::new().expect("home");
    let home = dir.path().to_path_buf();
    write_config(&home, &[("w", "sleep", &["100"])]);

    let daemon = tokio::spawn(runtime::run(home.clone()));
    wait_for_socket(&home).await;

    // The records file reflects the running worker immediately.
    let raw = fs::read_to_string(records_path(&home)).expect("records file");
    assert!(raw.contains("w"), "record for 'w' must be durable: {raw}");

    on_client(&home, |home| request_stop_worker(&home, "w")).await.expect("stop");
    let raw = fs::read_to_string(records_path(&home)).expect("records file");
    let parsed: serde_yaml::Value = serde_yaml::from_str(&raw).expect("valid yaml after removal");
    drop(parsed);

    on_client(&home, |home| request_shutdown(&home)).await.expect("shutdown");
    tokio::time::timeout(Duration::from_secs(30), daemon)
        .await
        .expect("daemon exit in time")
        .expect("join")
        .expect("clean exit");
}
