//! TOML configuration with defaults for every field.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file name.
pub const CONFIG_FILE: &str = "sqlbox.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Container runtime and image
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Engine accounts
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Instance lifetime
    #[serde(default)]
    pub sandbox: SandboxConfig,
    /// Readiness probing
    #[serde(default)]
    pub probe: ProbeConfig,
    /// Learner statement limits
    #[serde(default)]
    pub query: QueryConfig,
    /// Reconcile and expiry sweep
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Seed script overrides
    #[serde(default)]
    pub seeds: SeedsConfig,
    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Container runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Database engine image
    #[serde(default = "default_image")]
    pub image: String,

    /// Address the published engine port is reached on
    #[serde(default = "default_host")]
    pub host: String,

    /// Prefix of generated container names
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Pull the image when the runtime reports it missing
    #[serde(default = "default_true")]
    pub pull_missing: bool,

    /// Grace period given to `stop` before the runtime kills the container
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u32,

    /// Per-instance resource quota
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            host: default_host(),
            name_prefix: default_name_prefix(),
            pull_missing: true,
            stop_timeout_secs: default_stop_timeout(),
            resources: ResourceConfig::default(),
        }
    }
}

/// Per-container resource quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "1g", "512m")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "1", "0.5")
    #[serde(default = "default_cpus")]
    pub cpus: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
        }
    }
}

impl ResourceConfig {
    /// Memory limit in bytes.
    pub fn memory_bytes(&self) -> Result<i64> {
        parse_memory_limit(&self.memory)
    }

    /// CPU limit in units of 1e-9 CPUs, as the runtime expects.
    pub fn nano_cpus(&self) -> Result<i64> {
        let cpus: f64 = self
            .cpus
            .parse()
            .with_context(|| format!("Invalid CPU limit: {}", self.cpus))?;
        #[allow(clippy::cast_possible_truncation)]
        Ok((cpus * 1_000_000_000.0) as i64)
    }
}

/// Engine credentials. The root account provisions and probes; the
/// application account seeds and runs learner queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Password of the engine's root account
    #[serde(default = "default_password")]
    pub root_password: String,
    /// Application account name
    #[serde(default = "default_app_user")]
    pub app_user: String,
    /// Application account password
    #[serde(default = "default_password")]
    pub app_password: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            root_password: default_password(),
            app_user: default_app_user(),
            app_password: default_password(),
        }
    }
}

/// Instance lifetime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Advertised lifetime of an instance
    #[serde(default = "default_ttl")]
    pub ttl_minutes: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: default_ttl(),
        }
    }
}

impl SandboxConfig {
    /// Lifetime as a duration.
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.ttl_minutes))
    }
}

/// Readiness probe budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Connection attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Pause between attempts
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Timeout of a single connection attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_ms: default_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ProbeConfig {
    /// Pause between attempts.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Timeout of a single connection attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Limits on learner statements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on a single learner statement
    #[serde(default = "default_statement_timeout_ms")]
    pub statement_timeout_ms: u64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: default_statement_timeout_ms(),
        }
    }
}

impl QueryConfig {
    /// Statement limit as a duration.
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }
}

/// Background sweep settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Time between sweeps in watch mode
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
        }
    }
}

impl SweepConfig {
    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Seed catalog sources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedsConfig {
    /// Directory with `init_<tier>.sql` overrides
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Logging outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to a daily-rolling file in this directory
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_image() -> String {
    "mysql:8.0".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_name_prefix() -> String {
    "sql".to_string()
}

fn default_stop_timeout() -> u32 {
    5
}

fn default_memory() -> String {
    "1g".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_password() -> String {
    "practice_password".to_string()
}

fn default_app_user() -> String {
    "practice_user".to_string()
}

fn default_ttl() -> u32 {
    60
}

fn default_max_attempts() -> u32 {
    20
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_statement_timeout_ms() -> u64 {
    30_000
}

fn default_sweep_interval() -> u64 {
    60
}

impl Config {
    /// Load configuration from an explicit path. The file must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `sqlbox.toml` from `dir`, then from the user config directory,
    /// using defaults if neither exists.
    pub fn load(dir: &Path) -> Result<Self> {
        let candidates = std::iter::once(dir.join(CONFIG_FILE))
            .chain(dirs::config_dir().map(|d| d.join("sqlbox").join(CONFIG_FILE)));

        for path in candidates {
            if path.exists() {
                return Self::load_from(&path);
            }
        }

        Ok(Self::default())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.to_lowercase();

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().context("Invalid memory limit")?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().context("Invalid memory limit")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.image, "mysql:8.0");
        assert_eq!(config.probe.max_attempts, 20);
        assert_eq!(config.probe.interval(), Duration::from_secs(1));
        assert_eq!(config.sandbox.ttl(), chrono::Duration::hours(1));
        assert_eq!(config.credentials.app_user, "practice_user");
        assert!(config.seeds.dir.is_none());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
image = "mysql:8.4"
host = "10.0.0.5"

[runtime.resources]
memory = "512m"
cpus = "0.5"

[probe]
max_attempts = 5

[query]
statement_timeout_ms = 1000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.image, "mysql:8.4");
        assert_eq!(config.runtime.host, "10.0.0.5");
        assert_eq!(config.runtime.name_prefix, "sql");
        assert_eq!(config.probe.max_attempts, 5);
        assert_eq!(config.probe.interval_ms, 1000);
        assert_eq!(config.query.statement_timeout(), Duration::from_secs(1));
        assert_eq!(config.runtime.resources.memory_bytes().unwrap(), 512 * 1024 * 1024);
        assert_eq!(config.runtime.resources.nano_cpus().unwrap(), 500_000_000);
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_memory_limit("lots").is_err());
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE),
            "[sandbox]\nttl_minutes = 15\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.sandbox.ttl_minutes, 15);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "[probe\nmax_attempts = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
