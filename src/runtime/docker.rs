use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::service::{ContainerInspectResponse, HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// Runs engine containers on the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    service_port: String,
}

impl DockerRuntime {
    /// Connects with the local defaults (socket or `DOCKER_HOST`).
    ///
    /// `service_port` is the engine port whose published host port is
    /// reported back in [`ContainerInfo::host_port`].
    pub fn connect(service_port: impl Into<String>) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Unavailable {
            message: format!("Failed to connect to Docker. Is Docker running? {e}"),
        })?;
        Ok(Self {
            docker,
            service_port: service_port.into(),
        })
    }

    fn build_container_config(spec: &ContainerSpec) -> ContainerConfig<String> {
        // Empty host port lets the daemon pick a free one.
        let port_bindings: PortMap = HashMap::from([(
            spec.service_port.clone(),
            Some(vec![PortBinding {
                host_ip: Some(spec.bind_host.clone()),
                host_port: Some(String::new()),
            }]),
        )]);

        ContainerConfig {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            exposed_ports: Some(HashMap::from([(spec.service_port.clone(), HashMap::new())])),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                memory: spec.memory_bytes,
                nano_cpus: spec.nano_cpus,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn to_info(&self, response: ContainerInspectResponse) -> ContainerInfo {
        let state = response
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map_or(ContainerState::Unknown, |s| {
                ContainerState::parse(&s.to_string())
            });

        let labels = response
            .config
            .as_ref()
            .and_then(|c| c.labels.clone())
            .unwrap_or_default();

        let host_port = response
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
            .and_then(|ports| ports.get(&self.service_port))
            .and_then(Option::as_ref)
            .and_then(|bindings| {
                bindings
                    .iter()
                    .find_map(|b| b.host_port.as_deref().and_then(|p| p.parse().ok()))
            });

        ContainerInfo {
            id: response.id.unwrap_or_default(),
            name: response
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_default(),
            state,
            labels,
            host_port,
            created: response.created,
        }
    }
}

/// Maps a bollard error for the container `id`.
fn map_error(id: &str, err: BollardError) -> RuntimeError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound { id: id.to_string() },
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::failed(format!("{message} (status {status_code})")),
        other => RuntimeError::Unavailable {
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        debug!("Creating container: {}", spec.name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                Self::build_container_config(spec),
            )
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => RuntimeError::ImageNotFound {
                    image: spec.image.clone(),
                },
                other => map_error(&spec.name, other),
            })?;

        debug!("Starting container: {}", created.id);
        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| map_error(&created.id, e))?;

        Ok(created.id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_error(id, e))?;
        Ok(self.to_info(response))
    }

    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let label_filters: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: HashMap::from([("label".to_string(), label_filters)]),
                ..Default::default()
            }))
            .await
            .map_err(|e| map_error("", e))?;

        let mut containers = Vec::with_capacity(summaries.len());
        for id in summaries.into_iter().filter_map(|s| s.id) {
            match self.inspect(&id).await {
                Ok(info) => containers.push(info),
                // Removed between list and inspect
                Err(RuntimeError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(containers)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        match self.docker.start_container::<String>(id, None).await {
            Ok(())
            | Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(id, e)),
        }
    }

    async fn stop(&self, id: &str, timeout_secs: u32) -> Result<(), RuntimeError> {
        let options = StopContainerOptions {
            t: i64::from(timeout_secs),
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(())
            | Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(id, e)),
        }
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| map_error(id, e))
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable {
                message: format!("Cannot ping Docker daemon. Is Docker running? {e}"),
            })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let images = self
            .docker
            .list_images(Some(ListImagesOptions::<String> {
                filters: HashMap::from([("reference".to_string(), vec![image.to_string()])]),
                ..Default::default()
            }))
            .await
            .map_err(|e| map_error(image, e))?;
        Ok(!images.is_empty())
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        info!("Pulling Docker image: {}", image);

        let mut stream = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: image,
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => {
                    if let Some(error) = output.error {
                        return Err(RuntimeError::failed(format!("Docker pull error: {error}")));
                    }
                    if let Some(status) = output.status {
                        debug!("pull {}: {}", image, status.trim());
                    }
                }
                Err(e) => return Err(map_error(image, e)),
            }
        }

        info!("Image pulled successfully: {}", image);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::service::{ContainerConfig as InspectConfig, ContainerState as InspectState};
    use bollard::service::{ContainerStateStatusEnum, NetworkSettings};

    fn runtime() -> Option<DockerRuntime> {
        DockerRuntime::connect("3306/tcp").ok()
    }

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "sql-alice-0011aabb".to_string(),
            image: "mysql:8.0".to_string(),
            env: vec!["MYSQL_ROOT_PASSWORD=secret".to_string()],
            service_port: "3306/tcp".to_string(),
            bind_host: "127.0.0.1".to_string(),
            labels: HashMap::from([("sqlbox.owner_id".to_string(), "42".to_string())]),
            memory_bytes: Some(1024),
            nano_cpus: Some(500_000_000),
        }
    }

    #[test]
    fn test_build_container_config_publishes_service_port() {
        let config = DockerRuntime::build_container_config(&spec());
        let host_config = config.host_config.unwrap();
        let bindings = host_config.port_bindings.unwrap();
        let binding = bindings["3306/tcp"].as_ref().unwrap();
        assert_eq!(binding[0].host_ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(binding[0].host_port.as_deref(), Some(""));
        assert_eq!(host_config.memory, Some(1024));
        assert_eq!(host_config.nano_cpus, Some(500_000_000));
        assert_eq!(config.labels.unwrap()["sqlbox.owner_id"], "42");
        assert!(config.exposed_ports.unwrap().contains_key("3306/tcp"));
    }

    #[test]
    fn test_to_info_reads_port_and_labels() {
        let Some(runtime) = runtime() else {
            return;
        };
        let response = ContainerInspectResponse {
            id: Some("abc".to_string()),
            name: Some("/sql-alice-0011aabb".to_string()),
            created: Some("2024-05-01T10:00:00.123456789Z".to_string()),
            state: Some(InspectState {
                status: Some(ContainerStateStatusEnum::RUNNING),
                ..Default::default()
            }),
            config: Some(InspectConfig {
                labels: Some(HashMap::from([("k".to_string(), "v".to_string())])),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                ports: Some(HashMap::from([(
                    "3306/tcp".to_string(),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some("49153".to_string()),
                    }]),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let info = runtime.to_info(response);
        assert_eq!(info.id, "abc");
        assert_eq!(info.name, "sql-alice-0011aabb");
        assert_eq!(info.state, ContainerState::Running);
        assert_eq!(info.host_port, Some(49153));
        assert_eq!(info.labels["k"], "v");
    }

    #[test]
    fn test_map_error_not_found() {
        let err = map_error(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 404,
                message: "No such container".to_string(),
            },
        );
        assert!(err.is_not_found());

        let err = map_error(
            "abc",
            BollardError::DockerResponseServerError {
                status_code: 500,
                message: "boom".to_string(),
            },
        );
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn test_ping_no_docker() {
        // Either the daemon answers or the error says why it could not.
        let Some(runtime) = runtime() else {
            return;
        };
        if let Err(e) = runtime.ping().await {
            assert!(e.to_string().contains("Docker"), "Unexpected error: {e}");
        }
    }
}
