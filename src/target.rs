//! Monitored targets and their typed probe configuration
//!
//! Targets are stored with a `type` string and a JSON config document. Right
//! before a check runs, the (decrypted) document is parsed into a
//! [`ProbeSpec`], the tagged union the probe drivers dispatch on.

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::probes::ProbeError;

/// Raw per-target configuration document
pub type TargetConfig = Map<String, Value>;

/// Kind of a monitored target, taken from `monitor_targets.type`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Server,
    Storage,
    Application,
    Database,
    Business,
    Backup,
    /// Type string this build does not know about. Checked like any other
    /// target so it still yields an observation.
    Unknown(String),
}

impl TargetKind {
    pub fn from_type(value: &str) -> Self {
        match value {
            "server" => TargetKind::Server,
            "storage" => TargetKind::Storage,
            "application" => TargetKind::Application,
            "database" => TargetKind::Database,
            "business" => TargetKind::Business,
            "backup" => TargetKind::Backup,
            other => TargetKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            TargetKind::Server => "server",
            TargetKind::Storage => "storage",
            TargetKind::Application => "application",
            TargetKind::Database => "database",
            TargetKind::Business => "business",
            TargetKind::Backup => "backup",
            TargetKind::Unknown(other) => other,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured thing to monitor
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub kind: TargetKind,
    /// Stored form: sensitive fields are still encrypted here
    pub config: TargetConfig,
    pub enabled: bool,
}

/// A target about to be written to the registry
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub name: String,
    pub kind: TargetKind,
    pub config: TargetConfig,
    pub enabled: bool,
}

impl NewTarget {
    pub fn new(name: impl Into<String>, kind: TargetKind, config: TargetConfig) -> Self {
        Self {
            name: name.into(),
            kind,
            config,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Credentials for a remote shell session
#[derive(Clone, Deserialize)]
pub struct ShellTarget {
    pub host: String,
    #[serde(default = "default_ssh_port", deserialize_with = "lenient::port")]
    pub port: u16,
    pub username: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub password: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub key_file: Option<String>,
}

/// How a remote shell session authenticates
#[derive(Clone, PartialEq, Eq)]
pub enum ShellAuth {
    KeyFile(String),
    Password(String),
}

impl fmt::Debug for ShellAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellAuth::KeyFile(path) => f.debug_tuple("KeyFile").field(path).finish(),
            ShellAuth::Password(_) => f.debug_tuple("Password").field(&"***").finish(),
        }
    }
}

impl ShellTarget {
    /// A key file wins over a password when both are configured.
    pub fn auth(&self) -> Result<ShellAuth, ProbeError> {
        match (&self.key_file, &self.password) {
            (Some(key_file), _) => Ok(ShellAuth::KeyFile(key_file.clone())),
            (None, Some(password)) => Ok(ShellAuth::Password(password.clone())),
            (None, None) => Err(ProbeError::InvalidConfig(format!(
                "no password or key file configured for {}@{}",
                self.username, self.host
            ))),
        }
    }
}

// Secrets stay out of logs even when a spec is debug-printed.
impl fmt::Debug for ShellTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_file", &self.key_file.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalServerSpec {
    #[serde(default = "default_path")]
    pub disk_path: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub process_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteServerSpec {
    #[serde(flatten)]
    pub shell: ShellTarget,
    #[serde(default = "default_path")]
    pub disk_path: String,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub process_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSpec {
    #[serde(default = "default_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSpec {
    pub url: String,
}

#[derive(Clone, Deserialize)]
pub struct DatabaseSpec {
    #[serde(default = "default_db_type")]
    pub db_type: String,
    #[serde(default)]
    pub host: String,
    /// Unset (or `0`) means the engine's default port
    #[serde(default, deserialize_with = "lenient::opt_port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub database: String,
}

impl fmt::Debug for DatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSpec")
            .field("db_type", &self.db_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BusinessSpec {
    #[serde(flatten)]
    pub database: DatabaseSpec,
    pub query: String,
    #[serde(default, deserialize_with = "lenient::opt_number")]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackupSpec {
    #[serde(flatten)]
    pub shell: ShellTarget,
    pub backup_path: String,
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_max_age_hours", deserialize_with = "lenient::number")]
    pub max_age_hours: f64,
}

/// Typed configuration for one probe, one variant per driver
#[derive(Debug, Clone)]
pub enum ProbeSpec {
    LocalServer(LocalServerSpec),
    RemoteServer(RemoteServerSpec),
    Storage(StorageSpec),
    Application(HttpSpec),
    Database(DatabaseSpec),
    Business(BusinessSpec),
    Backup(BackupSpec),
}

impl ProbeSpec {
    /// Parse a decrypted target config into the spec for its kind.
    pub fn from_config(kind: &TargetKind, config: TargetConfig) -> Result<Self, ProbeError> {
        match kind {
            TargetKind::Server => {
                let remote = config.get("is_remote").is_some_and(lenient::truthy);
                if remote {
                    parse(kind, config).map(ProbeSpec::RemoteServer)
                } else {
                    parse(kind, config).map(ProbeSpec::LocalServer)
                }
            }
            TargetKind::Storage => parse(kind, config).map(ProbeSpec::Storage),
            TargetKind::Application => parse(kind, config).map(ProbeSpec::Application),
            TargetKind::Database => parse(kind, config).map(ProbeSpec::Database),
            TargetKind::Business => parse(kind, config).map(ProbeSpec::Business),
            TargetKind::Backup => parse(kind, config).map(ProbeSpec::Backup),
            TargetKind::Unknown(other) => Err(ProbeError::InvalidConfig(format!(
                "unsupported target type: {other}"
            ))),
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(
    kind: &TargetKind,
    config: TargetConfig,
) -> Result<T, ProbeError> {
    serde_json::from_value(Value::Object(config))
        .map_err(|e| ProbeError::InvalidConfig(format!("invalid {kind} config: {e}")))
}

fn default_path() -> String {
    "/".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_db_type() -> String {
    "mysql".to_string()
}

fn default_file_pattern() -> String {
    "*".to_string()
}

fn default_max_age_hours() -> f64 {
    24.0
}

/// Deserializers for values that arrive from web forms as strings.
mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        String(String),
        Null(()),
    }

    pub fn port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
        port_from(NumberOrString::deserialize(deserializer)?)
    }

    fn port_from<E: Error>(value: NumberOrString) -> Result<u16, E> {
        match value {
            NumberOrString::Number(n) if n.fract() == 0.0 && (1.0..=65535.0).contains(&n) => {
                Ok(n as u16)
            }
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid port: {s}"))),
            _ => Err(E::custom("invalid port")),
        }
    }

    pub fn opt_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u16>, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Null(()) => Ok(None),
            NumberOrString::Number(n) if n == 0.0 => Ok(None),
            NumberOrString::String(s) if matches!(s.trim(), "" | "0") => Ok(None),
            other => port_from(other).map(Some),
        }
    }

    pub fn opt_number<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<f64>, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::Number(n) => Ok(Some(n)),
            NumberOrString::String(s) if s.trim().is_empty() => Ok(None),
            NumberOrString::String(s) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid number: {s}"))),
            NumberOrString::Null(()) => Ok(None),
        }
    }

    pub fn number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        opt_number(deserializer)?.ok_or_else(|| D::Error::custom("missing number"))
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<String>, D::Error> {
        match NumberOrString::deserialize(deserializer)? {
            NumberOrString::String(s) if s.trim().is_empty() => Ok(None),
            NumberOrString::String(s) => Ok(Some(s)),
            NumberOrString::Number(n) => Ok(Some(n.to_string())),
            NumberOrString::Null(()) => Ok(None),
        }
    }

    pub fn truthy(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
            Value::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes" | "on"
            ),
            _ => false,
        }
    }
}
