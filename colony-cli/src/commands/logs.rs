//! `colony logs` — tail worker or daemon log files.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;

use colony_daemon::paths::{daemon_log_path, worker_logs_dir};

use super::home_dir;

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Worker whose log sink to tail. Omit with --daemon for daemon logs.
    pub worker: Option<String>,

    /// Number of trailing lines to show.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Tail the daemon's own log instead of a worker sink.
    #[arg(long)]
    pub daemon: bool,
}

impl LogsArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;

        if self.daemon {
            return print_tail(&daemon_log_path(&home), self.lines)
                .context("failed to read the daemon log");
        }

        let Some(worker) = self.worker else {
            anyhow::bail!("specify a worker name, or --daemon for the daemon's own logs");
        };
        let path = worker_logs_dir(&home).join(format!("{worker}.log"));
        print_tail(&path, self.lines).with_context(|| format!("failed to read logs for '{worker}'"))
    }
}

fn print_tail(path: &Path, lines: usize) -> Result<()> {
    if !path.exists() {
        println!("log file not found: {}", path.display());
        return Ok(());
    }

    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut tail = VecDeque::<String>::new();
    for line in reader.lines() {
        let line = line.with_context(|| format!("read {}", path.display()))?;
        if tail.len() == lines {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    println!("==> {} <==", path.display());
    for line in tail {
        println!("{line}");
    }
    Ok(())
}
