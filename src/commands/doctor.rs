use anyhow::{bail, Result};

use sqlbox::{Config, Difficulty, SandboxManager};

use super::format::{format_doctor, DoctorReport};
use super::Output;

/// Checks that Docker answers and whether the engine image is present.
pub async fn run(manager: &SandboxManager, config: &Config, out: Output) -> Result<()> {
    let orchestrator = manager.orchestrator();

    let runtime_error = orchestrator.ping().await.err().map(|e| e.to_string());
    let image_present = if runtime_error.is_none() {
        orchestrator.image_present().await.ok()
    } else {
        None
    };
    let seed_tiers = Difficulty::ALL
        .iter()
        .filter(|d| !manager.catalog().statements(**d).is_empty())
        .count();

    let report = DoctorReport {
        image: config.runtime.image.clone(),
        runtime_error,
        image_present,
        seed_tiers,
    };
    out.emit(&report, format_doctor)?;

    if !report.healthy() {
        bail!("Docker is not reachable");
    }
    Ok(())
}
