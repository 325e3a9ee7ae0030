//! In-memory storage backend (no persistence)
//!
//! Useful for tests and dry runs. Faults can be injected per operation to
//! exercise the failure paths of the pipeline without a broken database.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, AlertState, ObservationRow};
use crate::outcome::Status;
use crate::target::{NewTarget, Target};

/// Operation made to fail by [`MemoryStore::inject`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Targets,
    Observations,
    /// Observations of one target only
    ObservationsFor(i64),
    Alerts,
    Config,
}

#[derive(Default)]
struct Tables {
    targets: Vec<Target>,
    observations: Vec<ObservationRow>,
    alerts: Vec<AlertRow>,
    config: HashMap<String, String>,
    faults: HashSet<Fault>,
}

impl Tables {
    fn check(&self, fault: Fault) -> StorageResult<()> {
        if self.faults.contains(&fault) {
            return Err(StorageError::Unavailable(format!("injected fault: {fault:?}")));
        }
        Ok(())
    }
}

/// In-memory storage backend
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of the given operation fail.
    pub async fn inject(&self, fault: Fault) {
        self.tables.write().await.faults.insert(fault);
    }

    pub async fn clear_faults(&self) {
        self.tables.write().await.faults.clear();
    }

    /// Every observation written so far, oldest first.
    pub async fn observations(&self) -> Vec<ObservationRow> {
        self.tables.read().await.observations.clone()
    }

    /// Every alert written so far, oldest first.
    pub async fn alerts(&self) -> Vec<AlertRow> {
        self.tables.read().await.alerts.clone()
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_enabled_targets(&self) -> StorageResult<Vec<Target>> {
        let tables = self.tables.read().await;
        tables.check(Fault::Targets)?;
        Ok(tables
            .targets
            .iter()
            .filter(|target| target.enabled)
            .cloned()
            .collect())
    }

    async fn insert_observation(
        &self,
        target_id: i64,
        metric_type: &str,
        value_json: &str,
        status: Status,
    ) -> StorageResult<i64> {
        let mut tables = self.tables.write().await;
        tables.check(Fault::Observations)?;
        tables.check(Fault::ObservationsFor(target_id))?;

        let id = tables.observations.len() as i64 + 1;
        tables.observations.push(ObservationRow {
            id,
            target_id,
            metric_type: metric_type.to_string(),
            metric_value: serde_json::from_str(value_json)?,
            status,
            created_at: Utc::now(),
        });
        debug!("stored observation {id} for target {target_id}");
        Ok(id)
    }

    async fn insert_alert(
        &self,
        target_id: i64,
        alert_type: &str,
        message: &str,
    ) -> StorageResult<i64> {
        let mut tables = self.tables.write().await;
        tables.check(Fault::Alerts)?;

        let id = tables.alerts.len() as i64 + 1;
        tables.alerts.push(AlertRow {
            id,
            target_id,
            alert_type: alert_type.to_string(),
            message: message.to_string(),
            status: AlertState::Pending,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        let tables = self.tables.read().await;
        tables.check(Fault::Config)?;
        Ok(tables.config.get(key).cloned())
    }

    async fn set_config(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut tables = self.tables.write().await;
        tables.check(Fault::Config)?;
        tables.config.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn insert_target(&self, target: NewTarget) -> StorageResult<i64> {
        let mut tables = self.tables.write().await;
        let id = tables.targets.len() as i64 + 1;
        tables.targets.push(Target {
            id,
            name: target.name,
            kind: target.kind,
            config: target.config,
            enabled: target.enabled,
        });
        Ok(id)
    }

    async fn latest_observations(
        &self,
        target_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .observations
            .iter()
            .rev()
            .filter(|row| row.target_id == target_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn alerts_for(&self, target_id: i64) -> StorageResult<Vec<AlertRow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .alerts
            .iter()
            .filter(|row| row.target_id == target_id)
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let tables = self.tables.read().await;
        let healthy = tables.faults.is_empty();
        let message = if healthy {
            "In-memory storage operational".to_string()
        } else {
            format!("{} injected fault(s)", tables.faults.len())
        };
        Ok(HealthStatus {
            healthy,
            message,
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                (
                    "observations".to_string(),
                    tables.observations.len().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store (no-op)");
        Ok(())
    }
}
