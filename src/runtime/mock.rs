//! In-memory container runtime for testing.
//!
//! Tracks containers in a map and records calls so tests can assert on
//! lifecycle behavior without a Docker daemon.

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError};

/// A fake runtime holding containers in memory.
#[derive(Debug, Default)]
pub(crate) struct MockRuntime {
    containers: Mutex<HashMap<String, ContainerInfo>>,
    next_id: AtomicUsize,
    /// When set, `run` fails with this message.
    fail_run: Mutex<Option<String>>,
    /// State new containers start in.
    initial_state: Mutex<Option<ContainerState>>,
    images: Mutex<Vec<String>>,
    /// When true, `run` requires the image to have been pulled.
    require_image: Mutex<bool>,
    pub(crate) run_calls: AtomicUsize,
    pub(crate) start_calls: AtomicUsize,
    pub(crate) stop_calls: AtomicUsize,
    pub(crate) remove_calls: AtomicUsize,
    pub(crate) pull_calls: AtomicUsize,
}

impl MockRuntime {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `run` fail.
    pub(crate) fn fail_runs(&self, message: &str) {
        *self.fail_run.lock().unwrap() = Some(message.to_string());
    }

    /// Starts new containers in `state` instead of `Running`.
    pub(crate) fn start_in(&self, state: ContainerState) {
        *self.initial_state.lock().unwrap() = Some(state);
    }

    /// Makes `run` report the image missing until it is pulled.
    pub(crate) fn require_image(&self) {
        *self.require_image.lock().unwrap() = true;
    }

    /// Marks an image as present locally.
    pub(crate) fn add_image(&self, image: &str) {
        self.images.lock().unwrap().push(image.to_string());
    }

    /// Forces a container into a state.
    pub(crate) fn set_state(&self, id: &str, state: ContainerState) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.state = state;
        }
    }

    /// Overwrites one label on a container.
    pub(crate) fn set_label(&self, id: &str, key: &str, value: &str) {
        if let Some(c) = self.containers.lock().unwrap().get_mut(id) {
            c.labels.insert(key.to_string(), value.to_string());
        }
    }

    /// Ids of all containers still present.
    pub(crate) fn ids(&self) -> Vec<String> {
        self.containers.lock().unwrap().keys().cloned().collect()
    }

    pub(crate) fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn run(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.run_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.fail_run.lock().unwrap().clone() {
            return Err(RuntimeError::failed(message));
        }
        if *self.require_image.lock().unwrap() && !self.images.lock().unwrap().contains(&spec.image) {
            return Err(RuntimeError::ImageNotFound {
                image: spec.image.clone(),
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("container{n:04}");
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + Duration::seconds(i64::try_from(n).unwrap_or_default());
        let state = self
            .initial_state
            .lock()
            .unwrap()
            .unwrap_or(ContainerState::Running);

        let info = ContainerInfo {
            id: id.clone(),
            name: spec.name.clone(),
            state,
            labels: spec.labels.clone(),
            host_port: u16::try_from(40_000 + n).ok(),
            created: Some(created.to_rfc3339()),
        };
        self.containers.lock().unwrap().insert(id.clone(), info);
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        self.containers
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }

    async fn list(&self, labels: &[(&str, &str)]) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let containers = self.containers.lock().unwrap();
        let mut matching: Vec<ContainerInfo> = containers
            .values()
            .filter(|c| {
                labels
                    .iter()
                    .all(|(k, v)| c.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.containers.lock().unwrap();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })?;
        c.state = ContainerState::Running;
        Ok(())
    }

    async fn stop(&self, id: &str, _timeout_secs: u32) -> Result<(), RuntimeError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let mut containers = self.containers.lock().unwrap();
        let c = containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })?;
        c.state = ContainerState::Exited;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), RuntimeError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.containers
            .lock()
            .unwrap()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RuntimeError::NotFound { id: id.to_string() })
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.images.lock().unwrap().iter().any(|i| i == image))
    }

    async fn pull(&self, image: &str) -> Result<(), RuntimeError> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        self.add_image(image);
        Ok(())
    }
}
