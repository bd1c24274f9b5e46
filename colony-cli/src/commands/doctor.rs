//! `colony doctor` — orchestrator diagnostics.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use colony_daemon::protocol::request_doctor;
use colony_daemon::DaemonError;

use super::home_dir;

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl DoctorArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let report = match request_doctor(&home) {
            Ok(report) => report,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running; run 'colony up' first");
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to query diagnostics"),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report)
                    .context("failed to render diagnostics JSON")?
            );
            return Ok(());
        }

        println!("tracked workers: {}", report["tracked_workers"].as_u64().unwrap_or(0));

        match report["last_clean_reconcile_age_secs"].as_i64() {
            Some(age) => println!("last clean reconcile: {age}s ago"),
            None => println!("last clean reconcile: {}", "never".yellow()),
        }

        let reclaimed = report["reclaimed_at_startup"].as_array();
        match reclaimed {
            Some(names) if !names.is_empty() => {
                println!("reclaimed at startup:");
                for name in names {
                    println!("  {}", name.as_str().unwrap_or("?"));
                }
            }
            _ => println!("reclaimed at startup: none"),
        }

        let exhausted = report["exhausted"].as_array();
        match exhausted {
            Some(workers) if !workers.is_empty() => {
                println!("{}", "workers with exhausted restart budget:".red().bold());
                for worker in workers {
                    println!(
                        "  {} ({} restarts, crashed {})",
                        worker["name"].as_str().unwrap_or("?"),
                        worker["restart_count"].as_u64().unwrap_or(0),
                        worker["crashed_at"].as_str().unwrap_or("?"),
                    );
                }
            }
            _ => println!("{}", "no workers with exhausted restart budget".green()),
        }

        Ok(())
    }
}
