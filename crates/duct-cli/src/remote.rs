//! Cache transfer through an external `rclone` binary.

use std::process::Command;

use anyhow::{bail, Context};
use tracing::info;

use crate::project::Project;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Push,
    Fetch,
}

/// Build the `rclone copy` invocation between the cache and `remote`.
pub fn rclone_command(project: &Project, remote: &str, direction: Direction) -> Command {
    let cache = project.cache_dir();
    let mut cmd = Command::new("rclone");
    cmd.arg("copy").arg("--config").arg(project.rclone_config());
    match direction {
        Direction::Push => cmd.arg(cache).arg(remote),
        Direction::Fetch => cmd.arg(remote).arg(cache),
    };
    cmd
}

pub fn transfer(project: &Project, direction: Direction) -> anyhow::Result<()> {
    let Some(remote) = project.config.remote.as_deref() else {
        bail!("no remote configured; set `remote` in .duct/config.toml");
    };
    info!(remote, ?direction, "starting rclone");
    let status = rclone_command(project, remote, direction)
        .status()
        .context("failed to start rclone")?;
    if !status.success() {
        bail!("rclone exited with {status}");
    }
    Ok(())
}
