//! Per-sandbox commands: current, provision, describe, reset, destroy, purge.

use anyhow::Result;
use colored::Colorize;
use tracing::info;

use sqlbox::{Difficulty, SandboxManager};

use super::format::{format_destroyed, format_instance, format_no_instance};
use super::Output;

pub async fn current(manager: &SandboxManager, owner: &str, out: Output) -> Result<()> {
    let instance = manager.get_current(owner).await?;
    out.emit(&instance, |instance| match instance {
        Some(instance) => format_instance(instance),
        None => format_no_instance(owner),
    })
}

pub async fn provision(
    manager: &SandboxManager,
    owner: &str,
    name: &str,
    difficulty: Difficulty,
    out: Output,
) -> Result<()> {
    info!("Provisioning {} sandbox for {} ({})", difficulty, name, owner);
    let instance = manager.provision(owner, name, difficulty).await?;
    out.emit(&instance, |instance| {
        format!("\n{} Sandbox ready{}", "✓".green(), format_instance(instance))
    })
}

pub async fn describe(
    manager: &SandboxManager,
    id: &str,
    owner: Option<&str>,
    out: Output,
) -> Result<()> {
    let instance = match owner {
        Some(owner) => manager.describe_owned(id, owner).await?,
        None => manager.describe(id).await?,
    };
    out.emit(&instance, format_instance)
}

pub async fn reset(
    manager: &SandboxManager,
    id: &str,
    difficulty: Option<Difficulty>,
    owner: Option<&str>,
    out: Output,
) -> Result<()> {
    let instance = match owner {
        Some(owner) => manager.reset_owned(id, owner, difficulty).await?,
        None => manager.reset(id, difficulty).await?,
    };
    out.emit(&instance, |instance| {
        format!(
            "\n{} Reset with {} data{}",
            "✓".green(),
            instance.difficulty,
            format_instance(instance)
        )
    })
}

pub async fn destroy(
    manager: &SandboxManager,
    id: &str,
    owner: Option<&str>,
    out: Output,
) -> Result<()> {
    match owner {
        Some(owner) => manager.destroy_owned(id, owner).await?,
        None => manager.destroy(id).await?,
    }
    let removed = vec![id.to_string()];
    out.emit(&removed, |ids| format_destroyed(ids))
}

pub async fn purge(manager: &SandboxManager, owner: &str, out: Output) -> Result<()> {
    let removed = manager.purge_owner(owner).await?;
    out.emit(&removed, |ids| format_destroyed(ids))
}
