//! Per-worker operator commands: start, stop, stop-all, reconcile.

use anyhow::{Context, Result};
use clap::Args;

use colony_daemon::protocol::{
    request_reconcile, request_start, request_stop_all, request_stop_worker,
};

use super::home_dir;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Worker name as configured in workers.yaml.
    pub worker: String,
}

pub fn start(args: WorkerArgs) -> Result<()> {
    let home = home_dir()?;
    let data = request_start(&home, &args.worker)
        .with_context(|| format!("failed to start worker '{}'", args.worker))?;
    match data["pid"].as_u64() {
        Some(pid) => println!("started '{}' (pid {pid})", args.worker),
        None => println!("started '{}'", args.worker),
    }
    Ok(())
}

pub fn stop(args: WorkerArgs) -> Result<()> {
    let home = home_dir()?;
    request_stop_worker(&home, &args.worker)
        .with_context(|| format!("failed to stop worker '{}'", args.worker))?;
    println!("stopped '{}'", args.worker);
    Ok(())
}

pub fn stop_all() -> Result<()> {
    let home = home_dir()?;
    let data = request_stop_all(&home).context("failed to stop workers")?;
    let failures = data["errors"].as_array().map(Vec::len).unwrap_or(0);
    if failures == 0 {
        println!("all workers stopped");
    } else {
        println!("stopped with {failures} failure(s):");
        if let Some(errors) = data["errors"].as_array() {
            for err in errors {
                println!(
                    "  {}: {}",
                    err["worker"].as_str().unwrap_or("?"),
                    err["error"].as_str().unwrap_or("unknown error"),
                );
            }
        }
    }
    Ok(())
}

pub fn reconcile() -> Result<()> {
    let home = home_dir()?;
    let data = request_reconcile(&home).context("reconciliation failed")?;
    let count = |key: &str| data[key].as_array().map(Vec::len).unwrap_or(0);
    println!(
        "reconciled: {} started, {} stopped, {} restarted",
        count("started"),
        count("stopped"),
        count("restarted"),
    );
    if let Some(errors) = data["errors"].as_array() {
        for err in errors {
            println!("  error: {}", err.as_str().unwrap_or("unknown"));
        }
    }
    Ok(())
}
