//! Creates, inspects and tears down engine containers.
//!
//! Instance metadata lives in the container's runtime tags; every read
//! here goes back to the runtime.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::SERVICE_PORT;
use crate::error::{SandboxError, SandboxResult};
use crate::instance::{self, tags, Difficulty, Endpoint, SandboxInstance, SandboxStatus};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// Settings the orchestrator derives from [`Config`].
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Engine image
    pub image: String,
    /// Host published ports are reached on
    pub host: String,
    /// Prefix of container names
    pub name_prefix: String,
    /// Pull the image when it is not present
    pub pull_missing: bool,
    /// Grace period before a stop kills
    pub stop_timeout_secs: u32,
    /// Advertised instance lifetime
    pub ttl: chrono::Duration,
    /// Root password passed to the engine
    pub root_password: String,
    /// Application account created by the engine
    pub app_user: String,
    /// Application account password
    pub app_password: String,
    /// Memory quota
    pub memory_bytes: Option<i64>,
    /// CPU quota in 1e-9 CPUs
    pub nano_cpus: Option<i64>,
}

impl OrchestratorSettings {
    /// Settings from `config`, failing on an unparsable resource limit.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            image: config.runtime.image.clone(),
            host: config.runtime.host.clone(),
            name_prefix: config.runtime.name_prefix.clone(),
            pull_missing: config.runtime.pull_missing,
            stop_timeout_secs: config.runtime.stop_timeout_secs,
            ttl: config.sandbox.ttl(),
            root_password: config.credentials.root_password.clone(),
            app_user: config.credentials.app_user.clone(),
            app_password: config.credentials.app_password.clone(),
            memory_bytes: Some(config.runtime.resources.memory_bytes()?),
            nano_cpus: Some(config.runtime.resources.nano_cpus()?),
        })
    }
}

fn provisioning(err: RuntimeError) -> SandboxError {
    SandboxError::provisioning(err.to_string())
}

/// Maps a runtime lookup failure, keeping "not found" distinct.
fn lookup(id: &str, err: RuntimeError) -> SandboxError {
    if err.is_not_found() {
        SandboxError::not_found(id)
    } else {
        provisioning(err)
    }
}

/// Drives engine containers through a [`ContainerRuntime`].
#[derive(Clone)]
pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Orchestrator over `runtime`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, settings: OrchestratorSettings) -> Self {
        Self { runtime, settings }
    }

    fn container_spec(
        &self,
        owner_id: &str,
        owner_name: &str,
        difficulty: Difficulty,
        expires_at: DateTime<Utc>,
    ) -> ContainerSpec {
        let database = instance::database_name(owner_name);
        let s = &self.settings;
        ContainerSpec {
            name: instance::container_name(&s.name_prefix, owner_name),
            image: s.image.clone(),
            env: vec![
                format!("MYSQL_ROOT_PASSWORD={}", s.root_password),
                format!("MYSQL_DATABASE={database}"),
                format!("MYSQL_USER={}", s.app_user),
                format!("MYSQL_PASSWORD={}", s.app_password),
            ],
            service_port: SERVICE_PORT.to_string(),
            bind_host: s.host.clone(),
            labels: instance::owner_tags(owner_id, owner_name, &database, difficulty, expires_at),
            memory_bytes: s.memory_bytes,
            nano_cpus: s.nano_cpus,
        }
    }

    /// Starts a new engine container tagged with its owner.
    pub async fn create(
        &self,
        owner_id: &str,
        owner_name: &str,
        difficulty: Difficulty,
    ) -> SandboxResult<SandboxInstance> {
        let expires_at = Utc::now() + self.settings.ttl;
        let spec = self.container_spec(owner_id, owner_name, difficulty, expires_at);

        let id = match self.runtime.run(&spec).await {
            Ok(id) => id,
            Err(RuntimeError::ImageNotFound { image }) if self.settings.pull_missing => {
                warn!("Image {} not present locally, pulling", image);
                self.runtime.pull(&image).await.map_err(provisioning)?;
                self.runtime.run(&spec).await.map_err(provisioning)?
            }
            Err(e) => return Err(provisioning(e)),
        };

        info!(
            event = "sandbox_created",
            id = %id,
            name = %spec.name,
            owner_id,
            %difficulty,
        );

        let info = self.runtime.inspect(&id).await.map_err(provisioning)?;
        self.to_instance(info)
            .ok_or_else(|| SandboxError::provisioning(format!("Container {id} lost its tags")))
    }

    /// Reads one instance from the runtime.
    pub async fn get(&self, id: &str) -> SandboxResult<SandboxInstance> {
        let info = self.runtime.inspect(id).await.map_err(|e| lookup(id, e))?;
        self.to_instance(info)
            .ok_or_else(|| SandboxError::not_found(id))
    }

    /// All instances tagged with `owner_id`.
    pub async fn list(&self, owner_id: &str) -> SandboxResult<Vec<SandboxInstance>> {
        let containers = self
            .runtime
            .list(&[(tags::MANAGED, "true"), (tags::OWNER_ID, owner_id)])
            .await
            .map_err(provisioning)?;
        Ok(containers
            .into_iter()
            .filter_map(|c| self.to_instance(c))
            .collect())
    }

    /// Every instance managed by this crate, across owners.
    pub async fn list_all(&self) -> SandboxResult<Vec<SandboxInstance>> {
        let containers = self
            .runtime
            .list(&[(tags::MANAGED, "true")])
            .await
            .map_err(provisioning)?;
        Ok(containers
            .into_iter()
            .filter_map(|c| self.to_instance(c))
            .collect())
    }

    /// Starts a stopped container.
    pub async fn start(&self, id: &str) -> SandboxResult<()> {
        debug!("Starting container {}", id);
        self.runtime.start(id).await.map_err(|e| lookup(id, e))
    }

    /// Stops a container, waiting out the grace period.
    pub async fn stop(&self, id: &str) -> SandboxResult<()> {
        debug!("Stopping container {}", id);
        self.runtime
            .stop(id, self.settings.stop_timeout_secs)
            .await
            .map_err(|e| lookup(id, e))
    }

    /// Force-removes a container.
    pub async fn remove(&self, id: &str) -> SandboxResult<()> {
        debug!("Removing container {}", id);
        self.runtime.remove(id).await.map_err(|e| lookup(id, e))
    }

    /// Checks that the runtime answers.
    pub async fn ping(&self) -> SandboxResult<()> {
        self.runtime.ping().await.map_err(provisioning)
    }

    /// True if the configured engine image is present locally.
    pub async fn image_present(&self) -> SandboxResult<bool> {
        self.runtime
            .image_exists(&self.settings.image)
            .await
            .map_err(provisioning)
    }

    /// Builds an instance from runtime tags. Containers without our tags
    /// are not ours and yield `None`.
    fn to_instance(&self, info: ContainerInfo) -> Option<SandboxInstance> {
        if info.labels.get(tags::MANAGED).map(String::as_str) != Some("true") {
            return None;
        }
        let label = |key: &str| info.labels.get(key).cloned();

        let owner_id = label(tags::OWNER_ID)?;
        let owner_name = label(tags::OWNER_NAME).unwrap_or_default();
        let database_name =
            label(tags::DATABASE).unwrap_or_else(|| instance::database_name(&owner_name));
        let difficulty = label(tags::DIFFICULTY)
            .and_then(|d| d.parse().ok())
            .unwrap_or_default();

        let created_at = info
            .created
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let expires_at = label(tags::EXPIRES_AT)
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(created_at + self.settings.ttl);

        let endpoint = match (info.state, info.host_port) {
            (ContainerState::Running, Some(port)) => Some(Endpoint {
                host: self.settings.host.clone(),
                port,
            }),
            _ => None,
        };

        Some(SandboxInstance {
            status: status_of(info.state),
            runtime_state: info.state.to_string(),
            id: info.id,
            name: info.name,
            owner_id,
            owner_name,
            database_name,
            difficulty,
            endpoint,
            created_at,
            expires_at,
        })
    }
}

/// Lifecycle status implied by runtime state alone.
fn status_of(state: ContainerState) -> SandboxStatus {
    match state {
        ContainerState::Running => SandboxStatus::Ready,
        ContainerState::Created | ContainerState::Restarting => SandboxStatus::Provisioning,
        ContainerState::Removing => SandboxStatus::Removed,
        ContainerState::Paused
        | ContainerState::Exited
        | ContainerState::Dead
        | ContainerState::Unknown => SandboxStatus::Stopped,
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    pub(crate) fn settings() -> OrchestratorSettings {
        OrchestratorSettings::from_config(&Config::default()).unwrap()
    }

    fn orchestrator() -> (Arc<MockRuntime>, Orchestrator) {
        let runtime = Arc::new(MockRuntime::new());
        let orchestrator = Orchestrator::new(runtime.clone(), settings());
        (runtime, orchestrator)
    }

    #[tokio::test]
    async fn test_create_tags_owner_metadata() {
        let (_, orchestrator) = orchestrator();
        let instance = orchestrator
            .create("42", "alice", Difficulty::Medium)
            .await
            .unwrap();

        assert_eq!(instance.owner_id, "42");
        assert_eq!(instance.owner_name, "alice");
        assert_eq!(instance.database_name, "db_alice");
        assert_eq!(instance.difficulty, Difficulty::Medium);
        assert_eq!(instance.status, SandboxStatus::Ready);
        assert!(instance.name.starts_with("sql-alice-"));
        assert_eq!(instance.endpoint.unwrap().host, "127.0.0.1");
        let ttl = instance.expires_at - Utc::now();
        assert!(ttl > chrono::Duration::minutes(59));
    }

    #[test]
    fn test_container_spec_env_and_limits() {
        let (_, orchestrator) = orchestrator();
        let spec = orchestrator.container_spec("7", "bob", Difficulty::Easy, Utc::now());
        assert!(spec.env.contains(&"MYSQL_DATABASE=db_bob".to_string()));
        assert!(spec.env.contains(&"MYSQL_USER=practice_user".to_string()));
        assert_eq!(spec.service_port, "3306/tcp");
        assert_eq!(spec.memory_bytes, Some(1024 * 1024 * 1024));
        assert_eq!(spec.nano_cpus, Some(1_000_000_000));
    }

    #[tokio::test]
    async fn test_create_fails_with_provisioning_error() {
        let (runtime, orchestrator) = orchestrator();
        runtime.fail_runs("no space left on device");
        let err = orchestrator
            .create("42", "alice", Difficulty::Easy)
            .await
            .unwrap_err();
        assert!(err.is_provisioning());
        assert!(err.to_string().contains("no space left"));
    }

    #[tokio::test]
    async fn test_create_pulls_missing_image() {
        let (runtime, orchestrator) = orchestrator();
        runtime.require_image();
        orchestrator
            .create("42", "alice", Difficulty::Easy)
            .await
            .unwrap();
        assert_eq!(MockRuntime::count(&runtime.pull_calls), 1);
        assert_eq!(MockRuntime::count(&runtime.run_calls), 2);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (_, orchestrator) = orchestrator();
        let err = orchestrator.get("nope").await.unwrap_err();
        assert!(matches!(err, SandboxError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_by_owner() {
        let (_, orchestrator) = orchestrator();
        orchestrator.create("1", "alice", Difficulty::Easy).await.unwrap();
        orchestrator.create("1", "alice", Difficulty::Easy).await.unwrap();
        orchestrator.create("2", "bob", Difficulty::Easy).await.unwrap();

        assert_eq!(orchestrator.list("1").await.unwrap().len(), 2);
        assert_eq!(orchestrator.list("2").await.unwrap().len(), 1);
        assert!(orchestrator.list("3").await.unwrap().is_empty());
        assert_eq!(orchestrator.list_all().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_stopped_instance_has_no_endpoint() {
        let (_, orchestrator) = orchestrator();
        let instance = orchestrator.create("1", "alice", Difficulty::Easy).await.unwrap();
        orchestrator.stop(&instance.id).await.unwrap();

        let stopped = orchestrator.get(&instance.id).await.unwrap();
        assert_eq!(stopped.status, SandboxStatus::Stopped);
        assert_eq!(stopped.runtime_state, "exited");
        assert!(stopped.endpoint.is_none());
    }

    #[tokio::test]
    async fn test_created_container_is_provisioning() {
        let (runtime, orchestrator) = orchestrator();
        runtime.start_in(ContainerState::Created);
        let instance = orchestrator.create("1", "alice", Difficulty::Easy).await.unwrap();
        assert_eq!(instance.status, SandboxStatus::Provisioning);
        assert!(instance.endpoint.is_none());
    }

    #[tokio::test]
    async fn test_unmanaged_container_is_ignored() {
        let (runtime, orchestrator) = orchestrator();
        let instance = orchestrator.create("1", "alice", Difficulty::Easy).await.unwrap();
        runtime.set_label(&instance.id, tags::MANAGED, "false");
        assert!(orchestrator.get(&instance.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_image_present() {
        let (runtime, orchestrator) = orchestrator();
        assert!(!orchestrator.image_present().await.unwrap());
        runtime.add_image("mysql:8.0");
        assert!(orchestrator.image_present().await.unwrap());
        orchestrator.ping().await.unwrap();
    }

    #[test]
    fn test_parse_docker_timestamp() {
        let t = parse_timestamp("2024-05-01T10:00:00.123456789Z").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-05-01T10:00:00.123456789+00:00");
        assert!(parse_timestamp("yesterday").is_none());
    }
}
