//! Database engine abstraction.
//!
//! A [`SqlEngine`] opens [`SqlSession`]s to an instance; the MySQL
//! implementation speaks the wire protocol through sqlx.

#[cfg(test)]
pub(crate) mod mock;
mod mysql;

pub use mysql::MySqlEngine;

use async_trait::async_trait;
use std::time::Duration;

use crate::instance::Endpoint;
use crate::Row;

/// Engine port inside the container.
pub const SERVICE_PORT: &str = "3306/tcp";

/// Administrative database used when the application database must not be
/// selected (dropping and recreating it).
pub const ADMIN_DATABASE: &str = "mysql";

/// Errors reported by an engine client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Could not establish or keep a connection.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The engine rejected the statement.
    #[error("{0}")]
    Rejected(String),

    /// The statement exceeded its time limit.
    #[error("statement exceeded the {0:?} limit")]
    Timeout(Duration),
}

/// An engine account.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    /// Target for `database` on `endpoint` as this account.
    pub fn target(
        &self,
        endpoint: &Endpoint,
        database: &str,
        connect_timeout: Duration,
    ) -> ConnectTarget {
        ConnectTarget {
            host: endpoint.host.clone(),
            port: endpoint.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: database.to_string(),
            connect_timeout,
            statement_timeout: None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Give up connecting after this long.
    pub connect_timeout: Duration,
    /// Engine-side limit applied to every statement of the session.
    pub statement_timeout: Option<Duration>,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

/// What one statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutcome {
    /// Rows of the result set, in engine order.
    pub rows: Vec<Row>,
    /// Engine-reported affected rows for statements without a result set.
    pub rows_affected: u64,
    /// True when the statement returned rows.
    pub has_result_set: bool,
}

impl StatementOutcome {
    /// Outcome of a read.
    pub fn read(rows: Vec<Row>) -> Self {
        Self {
            rows,
            rows_affected: 0,
            has_result_set: true,
        }
    }

    /// Outcome of a write.
    pub fn write(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            rows_affected,
            has_result_set: false,
        }
    }
}

/// Opens sessions against an engine instance.
#[async_trait]
pub trait SqlEngine: Send + Sync {
    /// Connects and authenticates.
    async fn connect(&self, target: &ConnectTarget) -> Result<Box<dyn SqlSession>, EngineError>;
}

/// One authenticated connection.
#[async_trait]
pub trait SqlSession: Send {
    /// Executes `sql` verbatim and commits.
    async fn run(&mut self, sql: &str) -> Result<StatementOutcome, EngineError>;

    /// Closes the connection cleanly.
    async fn close(self: Box<Self>) -> Result<(), EngineError>;
}
