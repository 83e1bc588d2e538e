//! Worker configuration
//!
//! Everything is read from the environment (a `.env` file is loaded first
//! when present). Missing values fall back to the defaults below; values
//! that do not parse are treated as missing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::db::DbConfig;
use crate::ingest::batch::DEFAULT_MAX_PARAMS_PER_STATEMENT;
use crate::ingest::storage::MIN_PARAMS_PER_STATEMENT;

pub const DEFAULT_SYNC_INTERVAL_MINUTES: u64 = 3;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 40;
pub const DEFAULT_API_CALLS_LIMIT: u32 = 200;
pub const DEFAULT_USER_AGENT: &str = concat!("cycle-sync/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_NETPRINT_OFFSET_HOURS: i64 = 1;
/// The vendor fills netprint boxes 10-20 minutes after a group reaches state 30.
pub const MIN_NETPRINT_INTERVAL_MINUTES: u64 = 10;
pub const DEFAULT_NETPRINT_STATUSES: [i32; 2] = [30, 40];

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DbConfig,
    pub sync: SyncConfig,
    pub api: ApiConfig,
    pub netprint: NetprintConfig,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database: DbConfig::from_env()?,
            sync: SyncConfig::from_env(),
            api: ApiConfig::from_env(),
            netprint: NetprintConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("DATABASE_URL cannot be empty");
        }
        self.sync.validate()?;
        self.api.validate()?;
        self.netprint.validate()?;
        Ok(())
    }
}

/// Package ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Run the package ingestion job
    pub enabled: bool,
    /// Pause between ingestion cycles
    pub interval_minutes: u64,
    /// Failed attempts after which a pending reference stops being retried
    pub max_attempts: i32,
    /// Bind parameter ceiling for one multi-row insert
    pub max_params_per_statement: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_params_per_statement: DEFAULT_MAX_PARAMS_PER_STATEMENT,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_or("SYNC_FILL_BOXES_ENABLED", defaults.enabled),
            interval_minutes: env_or("SYNC_INTERVAL_MINUTES", defaults.interval_minutes),
            max_attempts: env_or("SYNC_MAX_ATTEMPTS", defaults.max_attempts),
            max_params_per_statement: env_or(
                "SYNC_MAX_PARAMS_PER_STATEMENT",
                defaults.max_params_per_statement,
            ),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.interval_minutes == 0 {
            anyhow::bail!("SYNC_INTERVAL_MINUTES must be greater than 0");
        }
        if self.max_attempts < 1 {
            anyhow::bail!("SYNC_MAX_ATTEMPTS must be at least 1");
        }
        if self.max_params_per_statement < MIN_PARAMS_PER_STATEMENT {
            anyhow::bail!(
                "SYNC_MAX_PARAMS_PER_STATEMENT must be at least {}",
                MIN_PARAMS_PER_STATEMENT
            );
        }
        if self.max_params_per_statement > DEFAULT_MAX_PARAMS_PER_STATEMENT {
            anyhow::bail!(
                "SYNC_MAX_PARAMS_PER_STATEMENT cannot exceed {}",
                DEFAULT_MAX_PARAMS_PER_STATEMENT
            );
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

/// Vendor HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiConfig {
    pub timeout_secs: u64,
    /// Calls one client may make per cycle, 0 disables the limit
    pub calls_limit: u32,
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            calls_limit: DEFAULT_API_CALLS_LIMIT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            timeout_secs: env_or("API_TIMEOUT_SECS", defaults.timeout_secs),
            calls_limit: env_or("API_CALLS_LIMIT", defaults.calls_limit),
            user_agent: std::env::var("API_USER_AGENT").unwrap_or(defaults.user_agent),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("API_TIMEOUT_SECS must be greater than 0");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Netprint box sync settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetprintConfig {
    pub enabled: bool,
    /// Source whose groups carry netprint numbers
    pub source: i32,
    /// How far before the last sync to look again
    pub offset_hours: i64,
    pub interval_minutes: u64,
    pub statuses: Vec<i32>,
}

impl Default for NetprintConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            source: 0,
            offset_hours: DEFAULT_NETPRINT_OFFSET_HOURS,
            interval_minutes: MIN_NETPRINT_INTERVAL_MINUTES,
            statuses: DEFAULT_NETPRINT_STATUSES.to_vec(),
        }
    }
}

impl NetprintConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let statuses = match std::env::var("NETPRINT_STATUSES") {
            Ok(raw) => parse_statuses(&raw)?,
            Err(_) => defaults.statuses,
        };

        let config = Self {
            enabled: env_or("NETPRINT_ENABLED", defaults.enabled),
            source: env_or("NETPRINT_SOURCE", defaults.source),
            offset_hours: env_or("NETPRINT_OFFSET_HOURS", defaults.offset_hours),
            interval_minutes: env_or("NETPRINT_INTERVAL_MINUTES", defaults.interval_minutes),
            statuses,
        };
        Ok(config.normalized())
    }

    /// Clamp values the way the netprint loop expects them.
    pub fn normalized(mut self) -> Self {
        if self.offset_hours <= 0 {
            self.offset_hours = DEFAULT_NETPRINT_OFFSET_HOURS;
        }
        self.interval_minutes = self.interval_minutes.max(MIN_NETPRINT_INTERVAL_MINUTES);
        self
    }

    /// Replace the look-back window, e.g. for a one-off rescan.
    pub fn with_offset_hours(mut self, offset_hours: Option<i64>) -> Self {
        if let Some(hours) = offset_hours {
            self.offset_hours = hours;
        }
        self.normalized()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled {
            if self.source <= 0 {
                anyhow::bail!("NETPRINT_SOURCE must be set when NETPRINT_ENABLED is true");
            }
            if self.statuses.is_empty() {
                anyhow::bail!("NETPRINT_STATUSES cannot be empty");
            }
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes * 60)
    }
}

fn parse_statuses(raw: &str) -> anyhow::Result<Vec<i32>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse()
                .map_err(|_| anyhow::anyhow!("Invalid NETPRINT_STATUSES entry: {}", s))
        })
        .collect()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
