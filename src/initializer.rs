//! Applies seed scripts to ready instances.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::engine::{Credentials, EngineError, SqlEngine, ADMIN_DATABASE};
use crate::error::{SandboxError, SandboxResult};
use crate::instance::{Difficulty, Endpoint, SandboxInstance};
use crate::seed::SeedCatalog;

/// Accounts used to seed and reset databases.
#[derive(Debug, Clone)]
pub struct InitializerSettings {
    /// Application account the seed data is written as.
    pub app: Credentials,
    /// Administrative account, used only to recreate the database.
    pub admin: Credentials,
    /// Timeout of each connection attempt.
    pub connect_timeout: Duration,
}

impl InitializerSettings {
    /// Settings from the credentials and probe sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            app: Credentials::new(
                config.credentials.app_user.clone(),
                config.credentials.app_password.clone(),
            ),
            admin: Credentials::new("root", config.credentials.root_password.clone()),
            connect_timeout: config.probe.connect_timeout(),
        }
    }
}

/// Runs a tier's seed statements against an instance's application database.
#[derive(Clone)]
pub struct Initializer {
    engine: Arc<dyn SqlEngine>,
    catalog: Arc<SeedCatalog>,
    settings: InitializerSettings,
}

impl Initializer {
    /// Initializer seeding from `catalog`.
    pub fn new(
        engine: Arc<dyn SqlEngine>,
        catalog: Arc<SeedCatalog>,
        settings: InitializerSettings,
    ) -> Self {
        Self {
            engine,
            catalog,
            settings,
        }
    }

    /// Catalog the seeds come from.
    pub fn catalog(&self) -> &SeedCatalog {
        &self.catalog
    }

    /// Executes every statement of the `difficulty` script in order.
    ///
    /// Stops at the first failing statement; earlier statements stay applied.
    pub async fn apply_seed(
        &self,
        instance: &SandboxInstance,
        difficulty: Difficulty,
    ) -> SandboxResult<()> {
        let endpoint = require_endpoint(instance)?;
        let statements = self.catalog.statements(difficulty);
        let target = self.settings.app.target(
            endpoint,
            &instance.database_name,
            self.settings.connect_timeout,
        );

        let mut session = self
            .engine
            .connect(&target)
            .await
            .map_err(|e| SandboxError::initialization(0, e.to_string()))?;

        for (index, statement) in statements.iter().enumerate() {
            debug!("Seed {} statement {}/{}", difficulty, index + 1, statements.len());
            if let Err(e) = session.run(statement).await {
                let _ = session.close().await;
                return Err(SandboxError::initialization(index + 1, describe(statement, &e)));
            }
        }

        // Data is committed per statement; a failed close loses nothing.
        let _ = session.close().await;
        info!(
            "Seeded {} with {} data ({} statements)",
            instance.database_name,
            difficulty,
            statements.len()
        );
        Ok(())
    }

    /// Drops and recreates the application database so a new tier starts
    /// from an empty schema.
    pub async fn reset_schema(&self, instance: &SandboxInstance) -> SandboxResult<()> {
        let endpoint = require_endpoint(instance)?;
        let target =
            self.settings
                .admin
                .target(endpoint, ADMIN_DATABASE, self.settings.connect_timeout);
        let database = quote_ident(&instance.database_name);
        let grant = format!(
            "GRANT ALL PRIVILEGES ON {database}.* TO '{}'@'%'",
            self.settings.app.user.replace('\'', "''")
        );

        let mut session = self
            .engine
            .connect(&target)
            .await
            .map_err(|e| SandboxError::initialization(0, e.to_string()))?;

        let statements = [
            format!("DROP DATABASE IF EXISTS {database}"),
            format!("CREATE DATABASE {database}"),
            grant,
        ];
        for (index, statement) in statements.iter().enumerate() {
            if let Err(e) = session.run(statement).await {
                let _ = session.close().await;
                return Err(SandboxError::initialization(index + 1, describe(statement, &e)));
            }
        }
        let _ = session.close().await;

        debug!("Recreated database {}", instance.database_name);
        Ok(())
    }
}

fn require_endpoint(instance: &SandboxInstance) -> SandboxResult<&Endpoint> {
    instance.endpoint.as_ref().ok_or_else(|| {
        SandboxError::initialization(0, format!("Sandbox {} is not running", instance.id))
    })
}

/// Error message prefixed with the start of the failing statement.
fn describe(statement: &str, err: &EngineError) -> String {
    let head: String = statement.chars().take(60).collect();
    let head = head.split_whitespace().collect::<Vec<_>>().join(" ");
    format!("{err} (in: {head})")
}

/// Backtick-quotes an identifier.
fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
