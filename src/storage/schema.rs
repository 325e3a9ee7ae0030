//! Rows read back from the monitoring database
//!
//! The core only appends observations and alerts; these read models exist for
//! tooling and tests that need to inspect what a cycle wrote.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::outcome::Status;

/// One persisted check result (`monitor_data`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: i64,
    pub target_id: i64,

    /// Target type the check ran as (`server`, `storage`, ...)
    pub metric_type: String,

    /// The outcome's metric document
    pub metric_value: Value,

    pub status: Status,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of an alert row. The core only ever writes `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Pending,
    Resolved,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertState::Pending),
            "resolved" => Ok(AlertState::Resolved),
            other => Err(format!("unknown alert state: {other}")),
        }
    }
}

/// One persisted alert (`alerts`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: i64,
    pub target_id: i64,
    pub alert_type: String,
    pub message: String,
    pub status: AlertState,
    pub created_at: DateTime<Utc>,
}
