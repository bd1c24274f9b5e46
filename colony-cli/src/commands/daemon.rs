//! `colony up` / `colony down` — daemon lifecycle.

use anyhow::{Context, Result};

use colony_daemon::protocol::request_shutdown;
use colony_daemon::runtime::start_blocking;
use colony_daemon::DaemonError;

use super::home_dir;

pub fn up() -> Result<()> {
    let home = home_dir()?;
    start_blocking(&home).context("daemon exited with error")
}

pub fn down() -> Result<()> {
    let home = home_dir()?;
    match request_shutdown(&home) {
        Ok(()) => {
            println!("daemon shutdown requested");
            Ok(())
        }
        Err(DaemonError::DaemonNotRunning { .. }) => {
            println!("daemon is not running");
            Ok(())
        }
        Err(err) => Err(err).context("failed to stop daemon"),
    }
}
