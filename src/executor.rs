//! Runs caller-supplied SQL against a ready instance.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::Config;
use crate::engine::{Credentials, EngineError, SqlEngine, StatementOutcome};
use crate::error::{SandboxError, SandboxResult};
use crate::instance::{SandboxInstance, SandboxStatus};
use crate::Row;

/// Result of one executed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Result set rows; empty for writes.
    pub rows: Vec<Row>,
    /// Wall-clock time in whole milliseconds.
    pub execution_time_ms: u64,
    /// Engine-reported affected rows; zero for reads.
    pub affected_rows: u64,
    /// Grading verdict, present only when a question was named.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

impl QueryResult {
    fn from_outcome(outcome: StatementOutcome, elapsed: Duration) -> Self {
        let execution_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        if outcome.has_result_set {
            Self {
                rows: outcome.rows,
                execution_time_ms,
                affected_rows: 0,
                is_correct: None,
            }
        } else {
            Self {
                rows: Vec::new(),
                execution_time_ms,
                affected_rows: outcome.rows_affected,
                is_correct: None,
            }
        }
    }
}

/// Account and limits used for learner statements.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Application account statements run as
    pub app: Credentials,
    /// Timeout of the connection attempt
    pub connect_timeout: Duration,
    /// Upper bound on one statement
    pub statement_timeout: Duration,
}

impl ExecutorSettings {
    /// Settings from the credentials, probe and query sections.
    pub fn from_config(config: &Config) -> Self {
        Self {
            app: Credentials::new(
                config.credentials.app_user.clone(),
                config.credentials.app_password.clone(),
            ),
            connect_timeout: config.probe.connect_timeout(),
            statement_timeout: config.query.statement_timeout(),
        }
    }
}

/// Executes statements verbatim as the instance's application user.
#[derive(Clone)]
pub struct QueryExecutor {
    engine: Arc<dyn SqlEngine>,
    settings: ExecutorSettings,
}

impl QueryExecutor {
    /// Executor over `engine`.
    pub fn new(engine: Arc<dyn SqlEngine>, settings: ExecutorSettings) -> Self {
        Self { engine, settings }
    }

    /// Runs `sql` unchanged and times it.
    ///
    /// No splitting, rewriting or retry. Engine failures, lost connections
    /// and exceeded statement limits all surface as query errors.
    pub async fn run(&self, instance: &SandboxInstance, sql: &str) -> SandboxResult<QueryResult> {
        if instance.status != SandboxStatus::Ready {
            return Err(SandboxError::query(format!(
                "Sandbox {} is not ready ({})",
                instance.id, instance.status
            )));
        }
        let endpoint = instance.endpoint.as_ref().ok_or_else(|| {
            SandboxError::query(format!("Sandbox {} has no endpoint", instance.id))
        })?;

        let mut target =
            self.settings
                .app
                .target(endpoint, &instance.database_name, self.settings.connect_timeout);
        target.statement_timeout = Some(self.settings.statement_timeout);

        let mut session = self
            .engine
            .connect(&target)
            .await
            .map_err(|e| SandboxError::query(e.to_string()))?;

        let started = Instant::now();
        let outcome =
            match tokio::time::timeout(self.settings.statement_timeout, session.run(sql)).await {
                Ok(result) => result,
                Err(_) => Err(EngineError::Timeout(self.settings.statement_timeout)),
            };
        let elapsed = started.elapsed();
        let _ = session.close().await;

        let outcome = outcome.map_err(|e| SandboxError::query(e.to_string()))?;
        debug!(
            "Executed on {} in {}ms ({} rows)",
            instance.id,
            elapsed.as_millis(),
            outcome.rows.len()
        );
        Ok(QueryResult::from_outcome(outcome, elapsed))
    }
}
