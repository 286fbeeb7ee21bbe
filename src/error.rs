//! Domain-specific error types for sandbox operations.
//!
//! Every failure that leaves the core is one of these variants. Runtime and
//! engine client failures are converted at the boundary of the component
//! that observed them and carry the original message as context.

use std::time::Duration;

/// Errors returned by the sandbox core.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// The container runtime could not schedule, start or reach an instance.
    #[error("Provisioning failed: {message}")]
    Provisioning { message: String },

    /// The instance did not accept connections within the probe budget.
    #[error("Sandbox did not become ready after {attempts} attempts ({waited_secs}s)")]
    StartupTimeout { attempts: u32, waited_secs: u64 },

    /// A seed script statement failed.
    #[error("Seeding failed at statement {statement}: {message}")]
    Initialization { statement: usize, message: String },

    /// No instance exists for the given id or owner.
    #[error("Sandbox not found: {id}")]
    NotFound { id: String },

    /// The engine rejected a statement or the connection failed.
    #[error("Query failed: {message}")]
    QueryExecution { message: String },

    /// The caller does not own the instance. Rendered like `NotFound` so the
    /// existence of other owners' instances does not leak.
    #[error("Sandbox not found: {id}")]
    Forbidden { id: String, owner_id: String },
}

/// Convenience alias used across the crate.
pub type SandboxResult<T> = Result<T, SandboxError>;

impl SandboxError {
    /// Creates a `Provisioning` error.
    pub fn provisioning(message: impl Into<String>) -> Self {
        Self::Provisioning {
            message: message.into(),
        }
    }

    /// Creates a `StartupTimeout` error from the attempt count and probe interval.
    pub fn startup_timeout(attempts: u32, interval: Duration) -> Self {
        Self::StartupTimeout {
            attempts,
            waited_secs: (interval * attempts).as_secs(),
        }
    }

    /// Creates an `Initialization` error for the 1-based statement index.
    pub fn initialization(statement: usize, message: impl Into<String>) -> Self {
        Self::Initialization {
            statement,
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Creates a `QueryExecution` error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::QueryExecution {
            message: message.into(),
        }
    }

    /// Creates a `Forbidden` error.
    pub fn forbidden(id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self::Forbidden {
            id: id.into(),
            owner_id: owner_id.into(),
        }
    }

    /// Returns true for `NotFound` and for the NotFound-shaped `Forbidden`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Forbidden { .. })
    }

    /// Returns true if the readiness deadline was exceeded.
    pub fn is_startup_timeout(&self) -> bool {
        matches!(self, Self::StartupTimeout { .. })
    }

    /// Returns true if the runtime failed to provision the instance.
    pub fn is_provisioning(&self) -> bool {
        matches!(self, Self::Provisioning { .. })
    }

    /// Returns true if a seed statement failed.
    pub fn is_initialization(&self) -> bool {
        matches!(self, Self::Initialization { .. })
    }

    /// Returns true if a caller statement failed.
    pub fn is_query(&self) -> bool {
        matches!(self, Self::QueryExecution { .. })
    }
}
