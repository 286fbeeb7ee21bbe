use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;

use sqlbox::{reaper, SandboxManager};

use super::format::format_sweep;
use super::Output;

/// One sweep, or with `watch` the background reaper until Ctrl+C.
pub async fn run(
    manager: Arc<SandboxManager>,
    watch: bool,
    interval: Duration,
    out: Output,
) -> Result<()> {
    if !watch {
        let report = manager.sweep().await?;
        return out.emit(&report, format_sweep);
    }

    let handle = reaper::spawn(manager, interval);
    println!(
        "\n{} Sweeping every {}s. {} to stop",
        "ℹ".blue(),
        interval.as_secs(),
        "Ctrl+C".dimmed()
    );
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    handle.abort();
    Ok(())
}
