//! Configuration.
//!
//! [`EngineConfig`] is what the sync engine is built from; it never touches
//! the environment. [`Config`] is the binary's view of the process
//! environment and produces an `EngineConfig` from the tables file it names.
//!
//! # Example
//!
//! ```
//! use sheetsync_engine::{ColumnDef, ColumnType, Schema};
//! use sheetsync_server::config::{EngineConfig, TableConfig};
//!
//! let schema = Schema::new(vec![
//!     ColumnDef::required("id", ColumnType::Integer),
//!     ColumnDef::required("name", ColumnType::Text),
//! ])
//! .unwrap();
//!
//! let config = EngineConfig::default().with_table(TableConfig::new("Users", schema));
//! assert_eq!(config.max_staleness_ms, 30_000);
//! assert_eq!(config.retry.max_attempts, 5);
//! ```

use serde::Deserialize;
use sheetsync_engine::{RangeName, Schema};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Sync engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Mirrored sheets
    #[serde(default)]
    pub tables: Vec<TableConfig>,

    /// Snapshots older than this are refreshed before serving a read
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub quota: QuotaConfig,
}

/// One mirrored sheet.
#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    /// Sheet title, also the range name callers use
    pub name: RangeName,
    pub schema: Schema,
    /// Rewrite a header row that does not match the schema instead of failing
    #[serde(default)]
    pub repair_headers: bool,
}

/// Backoff settings for remote calls.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per call, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

/// Remote API quota.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    /// Calls per minute (0 = unlimited)
    #[serde(default = "default_per_minute")]
    pub per_minute: u32,
    /// Calls that may go out back to back before throttling starts
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_max_staleness_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    2_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

fn default_per_minute() -> u32 {
    60
}

fn default_burst() -> u32 {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            max_staleness_ms: default_max_staleness_ms(),
            retry: RetryConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            burst: default_burst(),
        }
    }
}

impl EngineConfig {
    pub fn with_table(mut self, table: TableConfig) -> Self {
        self.tables.push(table);
        self
    }

    pub fn with_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness_ms = max_staleness.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_quota(mut self, quota: QuotaConfig) -> Self {
        self.quota = quota;
        self
    }

    pub fn max_staleness(&self) -> Duration {
        Duration::from_millis(self.max_staleness_ms)
    }

    /// Check that table names are unique and non-empty and that the retry
    /// settings describe a usable backoff curve.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;

        let mut seen = HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(ConfigError::InvalidTables("table name is empty".into()));
            }
            if table.schema.is_empty() {
                return Err(ConfigError::InvalidTables(format!(
                    "table '{}' has no columns",
                    table.name
                )));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(ConfigError::InvalidTables(format!(
                    "table '{}' is declared twice",
                    table.name
                )));
            }
        }
        Ok(())
    }
}

impl TableConfig {
    pub fn new(name: impl Into<RangeName>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            repair_headers: false,
        }
    }

    pub fn repair_headers(mut self, repair: bool) -> Self {
        self.repair_headers = repair;
        self
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetry(
                "max_attempts must be at least 1".into(),
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidRetry(format!(
                "multiplier must be a finite number >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }

    /// Retry without waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            multiplier: 1.0,
            jitter: false,
        }
    }
}

impl QuotaConfig {
    pub fn unlimited() -> Self {
        Self {
            per_minute: 0,
            burst: default_burst(),
        }
    }
}

/// Where the binary gets its access token.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Path to a service-account key file
    ServiceAccountFile(PathBuf),
    /// A ready bearer token
    AccessToken(String),
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Spreadsheet holding the mirrored sheets
    pub spreadsheet_id: String,
    pub credentials: CredentialSource,
    /// JSON file listing the mirrored tables
    pub tables_path: PathBuf,
    /// Background pull interval (None = no background pulls)
    pub pull_interval: Option<Duration>,
    /// Directory for periodic backups (None = no backups)
    pub backup_dir: Option<PathBuf>,
    pub backup_interval: Duration,
    pub quota_per_minute: Option<u32>,
    pub max_staleness: Option<Duration>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let spreadsheet_id = var("SPREADSHEET_ID").ok_or(ConfigError::Missing("SPREADSHEET_ID"))?;

        let credentials = match (var("GOOGLE_CREDENTIALS_JSON"), var("GOOGLE_ACCESS_TOKEN")) {
            (Some(path), _) => CredentialSource::ServiceAccountFile(path.into()),
            (None, Some(token)) => CredentialSource::AccessToken(token),
            (None, None) => return Err(ConfigError::MissingCredentials),
        };

        let tables_path = var("SHEETSYNC_TABLES")
            .ok_or(ConfigError::Missing("SHEETSYNC_TABLES"))?
            .into();

        let pull_interval = parse_number(&var, "PULL_INTERVAL_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let backup_dir = var("BACKUP_DIR").map(PathBuf::from);

        let backup_interval = Duration::from_secs(
            parse_number(&var, "BACKUP_INTERVAL_SECS")?.unwrap_or(8 * 60 * 60),
        );

        let quota_per_minute = parse_number(&var, "QUOTA_PER_MINUTE")?.map(|n| n as u32);

        let max_staleness = parse_number(&var, "MAX_STALENESS_SECS")?.map(Duration::from_secs);

        Ok(Self {
            host,
            port,
            spreadsheet_id,
            credentials,
            tables_path,
            pull_interval,
            backup_dir,
            backup_interval,
            quota_per_minute,
            max_staleness,
        })
    }

    /// Build the engine configuration: tables from the tables file, with the
    /// environment's overrides applied.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let tables = load_tables(&self.tables_path)?;
        let mut config = EngineConfig {
            tables,
            ..EngineConfig::default()
        };
        if let Some(per_minute) = self.quota_per_minute {
            config.quota.per_minute = per_minute;
        }
        if let Some(max_staleness) = self.max_staleness {
            config = config.with_max_staleness(max_staleness);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Read a JSON array of table definitions.
pub fn load_tables(path: &Path) -> Result<Vec<TableConfig>, ConfigError> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::TablesFile(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&json).map_err(|e| ConfigError::InvalidTables(e.to_string()))
}

fn parse_number(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<u64>, ConfigError> {
    var(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidNumber(name))
        })
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("GOOGLE_CREDENTIALS_JSON or GOOGLE_ACCESS_TOKEN must be set")]
    MissingCredentials,

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),

    #[error("cannot read tables file {0}")]
    TablesFile(String),

    #[error("invalid table definitions: {0}")]
    InvalidTables(String),

    #[error("invalid retry settings: {0}")]
    InvalidRetry(String),
}
