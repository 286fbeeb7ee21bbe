//! The sandbox instance model and the naming rules derived from owners.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum length of a sanitized owner name.
pub const MAX_NAME_LEN: usize = 32;

/// Runtime tag keys carrying instance metadata.
pub mod tags {
    /// Marks a container as managed by this crate.
    pub const MANAGED: &str = "sqlbox.managed";
    /// Id of the owning user.
    pub const OWNER_ID: &str = "sqlbox.owner_id";
    /// Display name of the owning user.
    pub const OWNER_NAME: &str = "sqlbox.owner_name";
    /// Application database name.
    pub const DATABASE: &str = "sqlbox.db_name";
    /// Difficulty tier seeded at creation.
    pub const DIFFICULTY: &str = "sqlbox.difficulty";
    /// RFC 3339 expiry timestamp.
    pub const EXPIRES_AT: &str = "sqlbox.expires_at";
}

/// Seed data profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    /// Two tables, three users.
    #[default]
    Easy,
    /// Four tables with orders and products.
    Medium,
    /// Six tables modelling departments, projects and time records.
    Hard,
}

impl Difficulty {
    /// All tiers, easiest first.
    pub const ALL: [Difficulty; 3] = [Self::Easy, Self::Medium, Self::Hard];

    /// Lowercase tier name as used in tags and file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "easy" => Ok(Self::Easy),
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(format!(
                "Unknown difficulty: '{s}'. Supported: easy, medium, hard"
            )),
        }
    }
}

/// Lifecycle of a sandbox instance.
///
/// `provisioning -> ready -> stopped -> removed`, with `ready -> ready` on
/// reset and `provisioning -> removed` when a failed startup is cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Created but not yet accepting connections or not yet seeded.
    Provisioning,
    /// Running and seeded.
    Ready,
    /// Container exited or paused.
    Stopped,
    /// Container gone or being removed.
    Removed,
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Provisioning => write!(f, "provisioning"),
            Self::Ready => write!(f, "ready"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Host and published port of an instance's database service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host the port is published on
    pub host: String,
    /// Published host port
    pub port: u16,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One owner-exclusive database container and its metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxInstance {
    /// Runtime container id
    pub id: String,
    /// Container name
    pub name: String,
    /// Id of the owning user
    pub owner_id: String,
    /// Display name of the owning user
    pub owner_name: String,
    /// Application database inside the container
    pub database_name: String,
    /// Tier the database was seeded with
    pub difficulty: Difficulty,
    /// Lifecycle status
    pub status: SandboxStatus,
    /// Raw runtime state, e.g. `running` or `exited`.
    pub runtime_state: String,
    /// Where the engine is reachable, while running
    pub endpoint: Option<Endpoint>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the advertised lifetime
    pub expires_at: DateTime<Utc>,
}

impl SandboxInstance {
    /// True once the instance is past its advertised lifetime.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// True unless the instance has been removed.
    pub fn is_live(&self) -> bool {
        self.status != SandboxStatus::Removed
    }
}

/// Replaces every character outside `[A-Za-z0-9_]` with `_`, prefixes empty
/// or digit-leading names with `user_` and caps the length.
pub fn sanitize_name(raw: &str) -> String {
    let mut sanitized: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if sanitized.is_empty() || sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert_str(0, "user_");
    }

    sanitized.truncate(MAX_NAME_LEN);
    sanitized
}

/// Application database name for an owner.
pub fn database_name(owner_name: &str) -> String {
    format!("db_{}", sanitize_name(owner_name))
}

/// Container name for an owner: prefix, sanitized name and a random suffix.
pub fn container_name(prefix: &str, owner_name: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{prefix}-{}-{}",
        sanitize_name(owner_name).to_lowercase(),
        &suffix[..8]
    )
}

/// Builds the runtime tag map recorded on a new container.
pub fn owner_tags(
    owner_id: &str,
    owner_name: &str,
    database: &str,
    difficulty: Difficulty,
    expires_at: DateTime<Utc>,
) -> HashMap<String, String> {
    HashMap::from([
        (tags::MANAGED.to_string(), "true".to_string()),
        (tags::OWNER_ID.to_string(), owner_id.to_string()),
        (tags::OWNER_NAME.to_string(), owner_name.to_string()),
        (tags::DATABASE.to_string(), database.to_string()),
        (tags::DIFFICULTY.to_string(), difficulty.to_string()),
        (tags::EXPIRES_AT.to_string(), expires_at.to_rfc3339()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_clean(name: &str) -> bool {
        name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }

    #[test]
    fn test_sanitize_digit_leading_name() {
        let db = database_name("7-leet");
        assert!(!db.starts_with(|c: char| c.is_ascii_digit()));
        assert!(is_clean(&db));
        assert_eq!(sanitize_name("7-leet"), "user_7_leet");
    }

    #[test]
    fn test_sanitize_empty_and_unicode() {
        assert_eq!(sanitize_name(""), "user_");
        let name = sanitize_name("张三 o'neil");
        assert!(is_clean(&name));
        assert!(name.ends_with("o_neil"));
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "a".repeat(100);
        assert_eq!(sanitize_name(&long).len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_container_names_do_not_collide() {
        let a = container_name("sql", "Alice");
        let b = container_name("sql", "Alice");
        assert!(a.starts_with("sql-alice-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_difficulty_from_str() {
        assert_eq!("easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        assert_eq!("Medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
        assert_eq!("HARD".parse::<Difficulty>().unwrap(), Difficulty::Hard);
        assert!("extreme".parse::<Difficulty>().is_err());
    }

    #[test]
    fn test_owner_tags() {
        let expires = Utc::now();
        let tags = owner_tags("42", "alice", "db_alice", Difficulty::Medium, expires);
        assert_eq!(tags[tags::OWNER_ID], "42");
        assert_eq!(tags[tags::DIFFICULTY], "medium");
        assert_eq!(tags[tags::MANAGED], "true");
        assert_eq!(tags[tags::EXPIRES_AT], expires.to_rfc3339());
    }
}
