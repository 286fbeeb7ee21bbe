//! Disposable per-user MySQL sandboxes.
//!
//! A [`SandboxManager`] provisions one seeded database container per owner,
//! runs caller SQL against it, grades the output against reference answers
//! and reclaims containers on request or once they expire.

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod grader;
pub mod initializer;
pub mod instance;
pub mod manager;
pub mod orchestrator;
pub mod prober;
pub mod reaper;
pub mod registry;
pub mod runtime;
pub mod seed;

pub use config::Config;
pub use error::{SandboxError, SandboxResult};
pub use executor::QueryResult;
pub use instance::{Difficulty, SandboxInstance, SandboxStatus};
pub use manager::{SandboxManager, SweepReport};

/// One result row: column name to value, in column order.
pub type Row = serde_json::Map<String, serde_json::Value>;
