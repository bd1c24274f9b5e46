//! Colony — local worker process orchestrator CLI.
//!
//! # Usage
//!
//! ```text
//! colony up
//! colony down
//! colony status [--json]
//! colony start <worker>
//! colony stop <worker>
//! colony stop-all
//! colony reconcile
//! colony doctor [--json]
//! colony logs [worker] [--lines <n>] [--daemon]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{doctor::DoctorArgs, logs::LogsArgs, status::StatusArgs, worker::WorkerArgs};

#[derive(Parser, Debug)]
#[command(
    name = "colony",
    version,
    about = "Keep a colony of local worker processes running",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the colony daemon in the foreground.
    Up,

    /// Request graceful daemon shutdown over the Unix socket.
    Down,

    /// Show daemon status and per-worker health.
    Status(StatusArgs),

    /// Start one configured worker by name.
    Start(WorkerArgs),

    /// Stop one worker by name (idempotent).
    Stop(WorkerArgs),

    /// Stop every tracked worker.
    StopAll,

    /// Re-read workers.yaml and converge the running set to it.
    Reconcile,

    /// Show orchestrator diagnostics (reclaimed records, dead workers).
    Doctor(DoctorArgs),

    /// Print recent log lines for a worker or the daemon itself.
    Logs(LogsArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Up => commands::daemon::up(),
        Commands::Down => commands::daemon::down(),
        Commands::Status(args) => args.run(),
        Commands::Start(args) => commands::worker::start(args),
        Commands::Stop(args) => commands::worker::stop(args),
        Commands::StopAll => commands::worker::stop_all(),
        Commands::Reconcile => commands::worker::reconcile(),
        Commands::Doctor(args) => args.run(),
        Commands::Logs(args) => args.run(),
    }
}
