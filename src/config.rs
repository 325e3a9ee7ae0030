use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::util;

/// Process-wide configuration of the monitor
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitorConfig {
    /// Path to the SQLite database shared with the web layer
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Interval in seconds, used when `system_config.check_interval` is unset
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Capacity of the worker pool shared by all cycles
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,

    /// Upper bound on a single check, on top of the per-driver timeouts
    #[serde(
        default = "default_check_timeout",
        deserialize_with = "seconds::deserialize"
    )]
    pub check_timeout: Duration,

    /// Webhook used when `system_config.wechat_webhook` is unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub timeouts: Timeouts,

    /// Key used to decrypt credentials stored in target configs
    #[serde(default = "default_key_file")]
    pub key_file: PathBuf,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            check_interval: default_check_interval(),
            max_concurrent_checks: default_max_concurrent_checks(),
            check_timeout: default_check_timeout(),
            webhook_url: None,
            thresholds: Thresholds::default(),
            timeouts: Timeouts::default(),
            key_file: default_key_file(),
            log_level: default_log_level(),
        }
    }
}

impl MonitorConfig {
    /// Apply `MONITOR_DB` and `WECHAT_WEBHOOK` from the environment.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(database) = util::get_database_path() {
            self.database = database;
        }
        if let Some(url) = util::get_webhook_url() {
            self.webhook_url = Some(url);
        }
        self
    }
}

/// Usage limits in percent; a reading strictly above the limit alerts
#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub storage: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: 80.0,
            memory: 80.0,
            disk: 80.0,
            storage: 80.0,
        }
    }
}

/// Every network timeout used by the probe drivers and the notifier
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub ssh: SshTimeouts,
    pub http: HttpTimeouts,
    pub database: DatabaseTimeouts,
    pub webhook: WebhookTimeouts,
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct SshTimeouts {
    #[serde(deserialize_with = "seconds::deserialize")]
    pub connect: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub banner: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub auth: Duration,
    /// Metric one-liners (cpu, memory, disk)
    #[serde(deserialize_with = "seconds::deserialize")]
    pub command: Duration,
    #[serde(deserialize_with = "seconds::deserialize")]
    pub process: Duration,
    /// Backup directory listing
    #[serde(deserialize_with = "seconds::deserialize")]
    pub listing: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            banner: Duration::from_secs(10),
            auth: Duration::from_secs(30),
            command: Duration::from_secs(3),
            process: Duration::from_secs(5),
            listing: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct HttpTimeouts {
    #[serde(deserialize_with = "seconds::deserialize")]
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct DatabaseTimeouts {
    #[serde(deserialize_with = "seconds::deserialize")]
    pub connect: Duration,
    /// Bound on a query round trip
    #[serde(deserialize_with = "seconds::deserialize")]
    pub read: Duration,
    /// Bound on the connection teardown
    #[serde(deserialize_with = "seconds::deserialize")]
    pub write: Duration,
}

impl Default for DatabaseTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Deserialize)]
#[serde(default)]
pub struct WebhookTimeouts {
    #[serde(deserialize_with = "seconds::deserialize")]
    pub request: Duration,
}

impl Default for WebhookTimeouts {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(5),
        }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

fn default_check_interval() -> u64 {
    60
}

fn default_max_concurrent_checks() -> usize {
    10
}

fn default_check_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_key_file() -> PathBuf {
    PathBuf::from(".secret_key")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Durations are written as (fractional) seconds in the config file.
mod seconds {
    use std::time::Duration;

    use serde::de::{Deserializer, Error};
    use serde::Deserialize;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|_| D::Error::custom(format!("invalid duration: {secs}")))
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<MonitorConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}
