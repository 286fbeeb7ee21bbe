//! The sandbox facade: provisioning, reset, query and teardown per owner.
//!
//! Provisioning, purging and reset for one owner run under that owner's
//! lock, so at most one instance per owner survives concurrent calls.

use anyhow::Context;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::engine::{MySqlEngine, SqlEngine, SERVICE_PORT};
use crate::error::{SandboxError, SandboxResult};
use crate::executor::{ExecutorSettings, QueryExecutor, QueryResult};
use crate::grader::{self, Grader, ShallowGrader};
use crate::initializer::{Initializer, InitializerSettings};
use crate::instance::{Difficulty, SandboxInstance, SandboxStatus};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::prober::{ProbeSettings, Prober};
use crate::registry::Registry;
use crate::runtime::{ContainerRuntime, ContainerState, DockerRuntime};
use crate::seed::SeedCatalog;

/// Outcome of one reconcile-and-reap pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Runtime-visible instances the table did not know.
    pub added: Vec<String>,
    /// Table entries whose container no longer exists.
    pub dropped: Vec<String>,
    /// Expired instances destroyed by this pass.
    pub reaped: Vec<String>,
}

/// Owner-keyed locks serializing provision, purge and reset.
type OwnerLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Facade over the sandbox lifecycle, keyed by instance id and owner id.
pub struct SandboxManager {
    orchestrator: Orchestrator,
    prober: Prober,
    initializer: Initializer,
    executor: QueryExecutor,
    catalog: Arc<SeedCatalog>,
    grader: Arc<dyn Grader>,
    registry: Registry,
    owner_locks: OwnerLocks,
}

impl SandboxManager {
    /// Manager backed by the local Docker daemon and MySQL.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let runtime = DockerRuntime::connect(SERVICE_PORT).context("Failed to connect to Docker")?;
        let catalog = SeedCatalog::load(config.seeds.dir.as_deref())?;
        Self::build(
            config,
            Arc::new(runtime),
            Arc::new(MySqlEngine::new()),
            catalog,
        )
    }

    /// Manager over explicit runtime and engine implementations.
    pub fn build(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        engine: Arc<dyn SqlEngine>,
        catalog: SeedCatalog,
    ) -> anyhow::Result<Self> {
        let orchestrator = Orchestrator::new(runtime, OrchestratorSettings::from_config(config)?);
        let catalog = Arc::new(catalog);

        Ok(Self {
            prober: Prober::new(
                orchestrator.clone(),
                engine.clone(),
                ProbeSettings::from_config(config),
            ),
            initializer: Initializer::new(
                engine.clone(),
                catalog.clone(),
                InitializerSettings::from_config(config),
            ),
            executor: QueryExecutor::new(engine, ExecutorSettings::from_config(config)),
            orchestrator,
            catalog,
            grader: Arc::new(ShallowGrader),
            registry: Registry::new(),
            owner_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Replaces the grading strategy.
    pub fn with_grader(mut self, grader: Arc<dyn Grader>) -> Self {
        self.grader = grader;
        self
    }

    /// Container lifecycle operations.
    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Seed scripts and reference answers in use.
    pub fn catalog(&self) -> &SeedCatalog {
        &self.catalog
    }

    /// Metadata table of known instances.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Waits for the owner's lock.
    async fn lock_owner(&self, owner_id: &str) -> OwnerGuard<'_> {
        let lock = self
            .owner_locks
            .lock()
            .entry(owner_id.to_string())
            .or_default()
            .clone();
        OwnerGuard {
            locks: &self.owner_locks,
            owner_id: owner_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// The owner's newest live instance, if any.
    pub async fn get_current(&self, owner_id: &str) -> SandboxResult<Option<SandboxInstance>> {
        let instances = self.orchestrator.list(owner_id).await?;
        Ok(instances
            .into_iter()
            .map(|i| self.registry.observe(i))
            .filter(SandboxInstance::is_live)
            .max_by_key(|i| i.created_at))
    }

    /// Replaces the owner's instance with a fresh, seeded one.
    ///
    /// On failure the new container is left in place for inspection or an
    /// explicit `destroy`.
    pub async fn provision(
        &self,
        owner_id: &str,
        owner_name: &str,
        difficulty: Difficulty,
    ) -> SandboxResult<SandboxInstance> {
        let _guard = self.lock_owner(owner_id).await;

        if let Err(e) = self.purge_locked(owner_id).await {
            warn!("Purge before provisioning for owner {} failed: {}", owner_id, e);
        }

        let mut instance = self
            .orchestrator
            .create(owner_id, owner_name, difficulty)
            .await?;
        instance.status = SandboxStatus::Provisioning;
        self.registry.upsert(instance.clone());

        self.prober.await_ready(&instance).await?;
        // Usable from here on, even if seeding stops part way
        self.registry.set_status(&instance.id, SandboxStatus::Ready);
        let instance = self.refresh(&instance.id).await?;
        self.initializer.apply_seed(&instance, difficulty).await?;

        info!(
            event = "sandbox_ready",
            id = %instance.id,
            owner_id,
            %difficulty,
        );
        Ok(instance)
    }

    /// Live state of an instance.
    ///
    /// A difficulty changed by [`reset`](Self::reset) is only known to the
    /// manager that performed it. Other managers report the creation tier
    /// from the runtime tags.
    pub async fn describe(&self, id: &str) -> SandboxResult<SandboxInstance> {
        self.refresh(id).await
    }

    /// Re-seeds an instance in place, restarting it first if it is not
    /// running. `None` keeps the instance's current difficulty.
    pub async fn reset(
        &self,
        id: &str,
        difficulty: Option<Difficulty>,
    ) -> SandboxResult<SandboxInstance> {
        let current = self.refresh(id).await?;
        let _guard = self.lock_owner(&current.owner_id).await;

        let difficulty = difficulty.unwrap_or(current.difficulty);
        let mut instance = current;

        if ContainerState::parse(&instance.runtime_state) != ContainerState::Running {
            info!("Restarting sandbox {} ({})", id, instance.runtime_state);
            self.registry.set_status(id, SandboxStatus::Provisioning);
            self.orchestrator.start(id).await?;
            instance = self.refresh(id).await?;
            self.prober.await_ready(&instance).await?;
            self.registry.set_status(id, SandboxStatus::Ready);
            instance = self.refresh(id).await?;
        }

        self.initializer.reset_schema(&instance).await?;
        self.registry.set_difficulty(id, difficulty);
        self.registry.set_status(id, SandboxStatus::Ready);
        self.initializer.apply_seed(&instance, difficulty).await?;
        info!(event = "sandbox_reset", id, %difficulty);

        Ok(SandboxInstance {
            difficulty,
            status: SandboxStatus::Ready,
            ..instance
        })
    }

    /// Runs `sql` and, when both a question and a difficulty are given,
    /// grades the rows.
    pub async fn execute(
        &self,
        id: &str,
        sql: &str,
        question_id: Option<u32>,
        difficulty: Option<Difficulty>,
    ) -> SandboxResult<QueryResult> {
        let instance = match self.registry.get(id) {
            Some(instance) => instance,
            None => self.refresh(id).await?,
        };

        let mut result = self.executor.run(&instance, sql).await?;
        if let (Some(question_id), Some(difficulty)) = (question_id, difficulty) {
            result.is_correct = Some(grader::grade(
                &self.catalog,
                self.grader.as_ref(),
                difficulty,
                question_id,
                &result.rows,
            ));
        }
        Ok(result)
    }

    /// Stops and removes an instance. Already-gone instances succeed.
    pub async fn destroy(&self, id: &str) -> SandboxResult<()> {
        match self.orchestrator.stop(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!("Sandbox {} already gone", id);
                self.registry.remove(id);
                return Ok(());
            }
            // Removal is forced, so a failed stop is not fatal.
            Err(e) => warn!("Failed to stop sandbox {}: {}", id, e),
        }

        match self.orchestrator.remove(id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.registry.remove(id);
        info!(event = "sandbox_destroyed", id);
        Ok(())
    }

    /// Destroys every instance of an owner. Returns the destroyed ids.
    pub async fn purge_owner(&self, owner_id: &str) -> SandboxResult<Vec<String>> {
        let _guard = self.lock_owner(owner_id).await;
        self.purge_locked(owner_id).await
    }

    /// Purges with the owner lock already held. Individual failures are
    /// logged and skipped.
    async fn purge_locked(&self, owner_id: &str) -> SandboxResult<Vec<String>> {
        let mut destroyed = Vec::new();
        for instance in self.orchestrator.list(owner_id).await? {
            match self.destroy(&instance.id).await {
                Ok(()) => destroyed.push(instance.id),
                Err(e) => warn!("Failed to destroy sandbox {}: {}", instance.id, e),
            }
        }
        // Entries the runtime no longer lists
        for stale in self.registry.by_owner(owner_id) {
            if !destroyed.contains(&stale.id) {
                self.registry.remove(&stale.id);
            }
        }
        if !destroyed.is_empty() {
            info!("Purged {} sandbox(es) for owner {}", destroyed.len(), owner_id);
        }
        Ok(destroyed)
    }

    /// Reconciles the table with the runtime and destroys expired instances.
    pub async fn sweep(&self) -> SandboxResult<SweepReport> {
        let live = self.orchestrator.list_all().await?;
        let reconciliation = self.registry.reconcile(live);
        let mut report = SweepReport {
            added: reconciliation.added,
            dropped: reconciliation.dropped,
            reaped: Vec::new(),
        };

        for instance in self.registry.expired(Utc::now()) {
            match self.destroy(&instance.id).await {
                Ok(()) => {
                    info!(
                        event = "sandbox_expired",
                        id = %instance.id,
                        owner_id = %instance.owner_id,
                        expires_at = %instance.expires_at,
                    );
                    report.reaped.push(instance.id);
                }
                Err(e) => warn!("Failed to reap sandbox {}: {}", instance.id, e),
            }
        }

        debug!(
            "Sweep: {} added, {} dropped, {} reaped",
            report.added.len(),
            report.dropped.len(),
            report.reaped.len()
        );
        Ok(report)
    }

    /// Instance owned by `owner_id`, or a NotFound-shaped denial.
    async fn authorize(&self, id: &str, owner_id: &str) -> SandboxResult<SandboxInstance> {
        let instance = self.refresh(id).await?;
        if instance.owner_id != owner_id {
            return Err(SandboxError::forbidden(id, owner_id));
        }
        Ok(instance)
    }

    /// [`describe`](Self::describe) for the instance's owner only.
    pub async fn describe_owned(&self, id: &str, owner_id: &str) -> SandboxResult<SandboxInstance> {
        self.authorize(id, owner_id).await
    }

    /// [`reset`](Self::reset) for the instance's owner only.
    pub async fn reset_owned(
        &self,
        id: &str,
        owner_id: &str,
        difficulty: Option<Difficulty>,
    ) -> SandboxResult<SandboxInstance> {
        self.authorize(id, owner_id).await?;
        self.reset(id, difficulty).await
    }

    /// [`execute`](Self::execute) for the instance's owner only.
    pub async fn execute_owned(
        &self,
        id: &str,
        owner_id: &str,
        sql: &str,
        question_id: Option<u32>,
        difficulty: Option<Difficulty>,
    ) -> SandboxResult<QueryResult> {
        self.authorize(id, owner_id).await?;
        self.execute(id, sql, question_id, difficulty).await
    }

    /// [`destroy`](Self::destroy) for the instance's owner only. A missing
    /// instance succeeds.
    pub async fn destroy_owned(&self, id: &str, owner_id: &str) -> SandboxResult<()> {
        match self.authorize(id, owner_id).await {
            Ok(_) => self.destroy(id).await,
            Err(SandboxError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads an instance from the runtime into the table.
    async fn refresh(&self, id: &str) -> SandboxResult<SandboxInstance> {
        match self.orchestrator.get(id).await {
            Ok(live) => Ok(self.registry.observe(live)),
            Err(e) => {
                if e.is_not_found() {
                    self.registry.remove(id);
                }
                Err(e)
            }
        }
    }
}

/// Holds an owner's lock. Dropping it forgets the lock once no other
/// caller holds or waits on it.
struct OwnerGuard<'a> {
    locks: &'a OwnerLocks,
    owner_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock();
        if locks
            .get(&self.owner_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.owner_id);
        }
    }
}
