//! `colony status` — daemon and per-worker health visibility.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde_json::{json, Value};
use tabled::{settings::Style, Table, Tabled};

use colony_daemon::protocol::{request_list, request_status};
use colony_daemon::{paths::socket_path, DaemonError};

use super::home_dir;

/// Arguments for `colony status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct WorkerTableRow {
    #[tabled(rename = "worker")]
    worker: String,
    #[tabled(rename = "pid")]
    pid: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "restarts")]
    restarts: String,
    #[tabled(rename = "up")]
    up: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        let status = match request_status(&home) {
            Ok(status) => status,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                return print_not_running(self.json, socket_path(&home));
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        };
        let workers = request_list(&home).context("failed to list workers")?;

        if self.json {
            let payload = json!({ "daemon": status, "workers": workers["workers"] });
            println!(
                "{}",
                serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
            );
            return Ok(());
        }

        print_daemon_line(&status);
        print_worker_table(&workers);
        Ok(())
    }
}

fn print_not_running(as_json: bool, socket: std::path::PathBuf) -> Result<()> {
    if as_json {
        let payload = json!({
            "daemon": { "running": false, "socket": socket.display().to_string() },
            "workers": [],
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&payload).context("failed to render status JSON")?
        );
    } else {
        println!("daemon is not running (socket missing: {})", socket.display());
        println!("Run 'colony up' to start it.");
    }
    Ok(())
}

fn print_daemon_line(status: &Value) {
    let workers = status["workers"].as_u64().unwrap_or(0);
    let uptime = status["started_at"]
        .as_str()
        .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
        .map(format_age)
        .unwrap_or_else(|| "unknown".to_string());
    println!(
        "Colony v{} | daemon up {} | {} workers tracked",
        env!("CARGO_PKG_VERSION"),
        uptime,
        workers,
    );
}

fn print_worker_table(workers: &Value) {
    let Some(rows) = workers["workers"].as_array() else {
        println!("No workers tracked.");
        return;
    };
    if rows.is_empty() {
        println!("No workers tracked.");
        return;
    }

    let table_rows: Vec<WorkerTableRow> = rows
        .iter()
        .map(|worker| {
            let health = &worker["health"];
            WorkerTableRow {
                worker: worker["name"].as_str().unwrap_or("?").to_string(),
                pid: worker["pid"]
                    .as_u64()
                    .map(|pid| pid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                status: status_label(health["status"].as_str()),
                restarts: health["restart_count"]
                    .as_u64()
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                up: worker["started_at"]
                    .as_str()
                    .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
                    .map(format_age)
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn status_label(status: Option<&str>) -> String {
    match status {
        Some("starting") => "STARTING".yellow().to_string(),
        Some("healthy") => "HEALTHY".green().to_string(),
        Some("unresponsive") => "UNRESPONSIVE".yellow().bold().to_string(),
        Some("crashed") => "CRASHED".red().bold().to_string(),
        Some("stopped") => "STOPPED".bright_black().to_string(),
        Some(other) => other.to_uppercase(),
        None => "UNKNOWN".bright_black().to_string(),
    }
}

/// Compact age like "3m", "2h", "5d".
fn format_age(at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(at);
    let secs = elapsed.num_seconds().max(0);
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    }
}
