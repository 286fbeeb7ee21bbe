//! Scripted engine for testing.
//!
//! Records every statement per database and answers with canned outcomes,
//! so probe, seed and query paths can be exercised without MySQL.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ConnectTarget, EngineError, SqlEngine, SqlSession, StatementOutcome};

#[derive(Debug, Default)]
struct Script {
    /// Exact statement text to outcome.
    responses: HashMap<String, StatementOutcome>,
    /// Statements containing the key fail with the message.
    failures: Vec<(String, String)>,
    /// Connections still to refuse before one is accepted.
    refusals_left: Option<usize>,
    refuse_forever: bool,
    delay: Option<Duration>,
}

/// A fake engine shared by all sessions it opens.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockEngine {
    script: Arc<Mutex<Script>>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
    targets: Arc<Mutex<Vec<ConnectTarget>>>,
    pub(crate) connect_calls: Arc<AtomicUsize>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answers `sql` with `outcome`.
    pub(crate) fn respond(&self, sql: &str, outcome: StatementOutcome) {
        self.script
            .lock()
            .unwrap()
            .responses
            .insert(sql.to_string(), outcome);
    }

    /// Fails every statement containing `needle`.
    pub(crate) fn fail_on(&self, needle: &str, message: &str) {
        self.script
            .lock()
            .unwrap()
            .failures
            .push((needle.to_string(), message.to_string()));
    }

    /// Refuses the next `n` connections.
    pub(crate) fn refuse_connections(&self, n: usize) {
        self.script.lock().unwrap().refusals_left = Some(n);
    }

    /// Refuses every connection.
    pub(crate) fn refuse_all(&self) {
        self.script.lock().unwrap().refuse_forever = true;
    }

    /// Delays every statement.
    pub(crate) fn delay(&self, delay: Duration) {
        self.script.lock().unwrap().delay = Some(delay);
    }

    /// Statements run against `database`, in order.
    pub(crate) fn executed_on(&self, database: &str) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(db, _)| db == database)
            .map(|(_, sql)| sql.clone())
            .collect()
    }

    /// Every target a connection was attempted with.
    pub(crate) fn targets(&self) -> Vec<ConnectTarget> {
        self.targets.lock().unwrap().clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlEngine for MockEngine {
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>, EngineError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(target.clone());

        {
            let mut script = self.script.lock().unwrap();
            if script.refuse_forever {
                return Err(EngineError::Connect("Connection refused".to_string()));
            }
            if let Some(left) = script.refusals_left.as_mut() {
                if *left > 0 {
                    *left -= 1;
                    return Err(EngineError::Connect("Connection refused".to_string()));
                }
            }
        }

        Ok(Box::new(MockSession {
            engine: self.clone(),
            database: target.database.clone(),
        }))
    }
}

struct MockSession {
    engine: MockEngine,
    database: String,
}

#[async_trait]
impl SqlSession for MockSession {
    async fn run(&mut self, sql: &str) -> Result<StatementOutcome, EngineError> {
        let delay = self.engine.script.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.engine
            .executed
            .lock()
            .unwrap()
            .push((self.database.clone(), sql.to_string()));

        let script = self.engine.script.lock().unwrap();
        if let Some((_, message)) = script.failures.iter().find(|(needle, _)| sql.contains(needle)) {
            return Err(EngineError::Rejected(message.clone()));
        }
        Ok(script
            .responses
            .get(sql)
            .cloned()
            .unwrap_or_else(|| StatementOutcome::write(0)))
    }

    async fn close(self: Box<Self>) -> Result<(), EngineError> {
        Ok(())
    }
}
