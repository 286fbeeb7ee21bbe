//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::manager::SandboxManager;

/// Runs [`SandboxManager::sweep`] every `interval` until the handle is
/// aborted. The first sweep happens immediately.
pub fn spawn(manager: Arc<SandboxManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match manager.sweep().await {
                Ok(report) if !report.reaped.is_empty() => {
                    info!("Reaped {} expired sandbox(es)", report.reaped.len());
                }
                Ok(_) => {}
                Err(e) => warn!("Sweep failed: {}", e),
            }
        }
    })
}
