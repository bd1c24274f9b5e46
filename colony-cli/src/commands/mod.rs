pub mod daemon;
pub mod doctor;
pub mod logs;
pub mod status;
pub mod worker;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}
