use anyhow::Context;
use clap::Parser;
use tracing::{warn, Level};

use duct_stage::CancelToken;

mod cli;
mod commands;
mod config;
mod project;
mod remote;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cwd = std::env::current_dir()
        .and_then(|dir| dir.canonicalize())
        .context("failed to read current directory")?;
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; stopping running stages");
            on_interrupt.cancel();
        }
    });

    tokio::task::spawn_blocking(move || commands::run_command(cli, &cwd, cancel))
        .await
        .context("command task panicked")?
}
