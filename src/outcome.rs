//! Normalized check results
//!
//! Every probe, whatever the target kind, ends up as an [`Outcome`]: a status,
//! a free-form metric document that is persisted verbatim, and an optional
//! alert. Outcomes are built once and handed to the result sink unchanged.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metric document attached to an outcome (persisted as JSON)
pub type Metrics = Map<String, Value>;

/// Health classification of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
    Error,
    Offline,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Error => "error",
            Status::Offline => "offline",
        }
    }

    /// Anything but `normal` is reported to the alert dispatcher.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Status::Normal)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Status::Normal),
            "warning" => Ok(Status::Warning),
            "error" => Ok(Status::Error),
            "offline" => Ok(Status::Offline),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// Category stored in `alerts.alert_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Server,
    Cpu,
    Memory,
    Disk,
    Storage,
    Process,
    Application,
    Database,
    Business,
    Backup,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Server => "server",
            AlertKind::Cpu => "cpu",
            AlertKind::Memory => "memory",
            AlertKind::Disk => "disk",
            AlertKind::Storage => "storage",
            AlertKind::Process => "process",
            AlertKind::Application => "application",
            AlertKind::Database => "database",
            AlertKind::Business => "business",
            AlertKind::Backup => "backup",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The normalized result of one probe
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub status: Status,
    pub metrics: Metrics,
    pub alert: bool,
    /// Overrides the target kind as the alert category when set
    pub alert_kind: Option<AlertKind>,
    pub alert_message: Option<String>,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn new(status: Status, metrics: Metrics) -> Self {
        Self {
            status,
            metrics,
            alert: false,
            alert_kind: None,
            alert_message: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn normal(metrics: Metrics) -> Self {
        Self::new(Status::Normal, metrics)
    }

    /// A failed check. The reason ends up in the `error` metric so the
    /// persisted observation explains what went wrong.
    pub fn failure(status: Status, error: impl Into<String>) -> Self {
        let mut metrics = Metrics::new();
        metrics.insert("status".to_string(), Value::from(status.as_str()));
        metrics.insert("error".to_string(), Value::from(error.into()));
        Self::new(status, metrics)
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn with_alert(mut self, kind: Option<AlertKind>, message: impl Into<String>) -> Self {
        self.alert = true;
        self.alert_kind = kind;
        self.alert_message = Some(message.into());
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    /// Error text recorded by a failing probe, if any.
    pub fn error(&self) -> Option<&str> {
        self.metrics.get("error").and_then(Value::as_str)
    }

    /// Whether the result sink has to hand this outcome to the dispatcher.
    pub fn needs_alert(&self) -> bool {
        self.alert || self.status.is_abnormal()
    }
}
