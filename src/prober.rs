//! Readiness probing for freshly started instances.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{Credentials, SqlEngine};
use crate::error::{SandboxError, SandboxResult};
use crate::instance::SandboxInstance;
use crate::orchestrator::Orchestrator;
use crate::runtime::ContainerState;

/// Probe budget and the administrative account used to probe.
#[derive(Debug, Clone)]
pub struct ProbeSettings {
    /// Connection attempts before a startup timeout
    pub max_attempts: u32,
    /// Pause between attempts
    pub interval: Duration,
    /// Timeout of a single attempt
    pub connect_timeout: Duration,
    /// Account the probe connects as
    pub admin: Credentials,
}

impl ProbeSettings {
    /// Settings from the probe and credentials sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_attempts: config.probe.max_attempts,
            interval: config.probe.interval(),
            connect_timeout: config.probe.connect_timeout(),
            admin: Credentials::new("root", config.credentials.root_password.clone()),
        }
    }
}

/// Polls an instance until it accepts authenticated connections.
#[derive(Clone)]
pub struct Prober {
    orchestrator: Orchestrator,
    engine: Arc<dyn SqlEngine>,
    settings: ProbeSettings,
}

impl Prober {
    /// Prober re-reading instance state through `orchestrator`.
    pub fn new(orchestrator: Orchestrator, engine: Arc<dyn SqlEngine>, settings: ProbeSettings) -> Self {
        Self {
            orchestrator,
            engine,
            settings,
        }
    }

    /// Waits until a connect-and-disconnect succeeds.
    ///
    /// Makes at most `max_attempts` connection attempts, sleeping `interval`
    /// between them. Aborts with a provisioning error as soon as the
    /// container is seen to have exited; otherwise fails with a startup
    /// timeout and leaves the container running.
    ///
    /// A missing endpoint is re-read once before the first attempt. An
    /// attempt made while the runtime still publishes no port counts
    /// against the budget.
    pub async fn await_ready(&self, instance: &SandboxInstance) -> SandboxResult<()> {
        let mut endpoint = match &instance.endpoint {
            Some(ep) => Some(ep.clone()),
            None => self.orchestrator.get(&instance.id).await?.endpoint,
        };

        for attempt in 1..=self.settings.max_attempts {
            if let Some(ep) = &endpoint {
                let target =
                    self.settings
                        .admin
                        .target(ep, &instance.database_name, self.settings.connect_timeout);
                match self.engine.connect(&target).await {
                    Ok(session) => {
                        // A failed close still proves the engine accepted us.
                        let _ = session.close().await;
                        info!("Sandbox {} ready after {} attempt(s)", instance.id, attempt);
                        return Ok(());
                    }
                    Err(e) => debug!("Probe {} of {} for {}: {}", attempt, self.settings.max_attempts, instance.id, e),
                }
            } else {
                debug!("Probe {} for {}: no published port yet", attempt, instance.id);
            }

            if attempt == self.settings.max_attempts {
                break;
            }
            tokio::time::sleep(self.settings.interval).await;

            let live = self.orchestrator.get(&instance.id).await?;
            if ContainerState::parse(&live.runtime_state).has_exited() {
                return Err(SandboxError::provisioning(format!(
                    "Container {} exited during startup ({})",
                    instance.id, live.runtime_state
                )));
            }
            endpoint = live.endpoint.or(endpoint);
        }

        Err(SandboxError::startup_timeout(
            self.settings.max_attempts,
            self.settings.interval,
        ))
    }
}
