//! Container runtime abstraction.
//!
//! The orchestrator drives instances through [`ContainerRuntime`]; the
//! Docker implementation talks to the daemon via bollard.

mod docker;
#[cfg(test)]
pub(crate) mod mock;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use std::collections::HashMap;

/// Errors reported by a container runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The daemon could not be reached.
    #[error("Container runtime is not available: {message}")]
    Unavailable { message: String },

    /// The image does not exist locally.
    #[error("Container image not found: {image}")]
    ImageNotFound { image: String },

    /// No container with this id or name.
    #[error("No such container: {id}")]
    NotFound { id: String },

    /// Any other runtime failure.
    #[error("Container operation failed: {message}")]
    Failed { message: String },
}

impl RuntimeError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Everything needed to create one engine container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    /// Engine port inside the container, e.g. `3306/tcp`.
    pub service_port: String,
    /// Host address the dynamically assigned port is bound on.
    pub bind_host: String,
    pub labels: HashMap<String, String>,
    pub memory_bytes: Option<i64>,
    pub nano_cpus: Option<i64>,
}

/// Runtime state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Restarting,
    Paused,
    Exited,
    Dead,
    Removing,
    Unknown,
}

impl ContainerState {
    /// Maps the runtime's status string.
    pub fn parse(status: &str) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "restarting" => Self::Restarting,
            "paused" => Self::Paused,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            "removing" => Self::Removing,
            _ => Self::Unknown,
        }
    }

    /// True when the container can no longer become ready on its own.
    pub fn has_exited(self) -> bool {
        matches!(self, Self::Exited | Self::Dead | Self::Removing)
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Restarting => "restarting",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Dead => "dead",
            Self::Removing => "removing",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Inspected view of a container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    /// Host port bound to the service port, once published.
    pub host_port: Option<u16>,
    /// RFC 3339 creation time as reported by the runtime.
    pub created: Option<String>,
}

/// Operations the orchestrator needs from a container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates and starts a container, returning its id.
    async fn run(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    /// Inspects one container by id or name.
    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;

    /// Lists all containers (running or not) carrying every given label.
    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Starts a stopped container.
    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops a container. Stopping a stopped container succeeds.
    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError>;

    /// Removes a container.
    async fn remove(&self, id: &str) -> Result<(), RuntimeError>;

    /// Checks that the runtime is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// True if the image is present locally.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Pulls an image.
    async fn pull(&self, image: &str) -> Result<(), RuntimeError>;
}
