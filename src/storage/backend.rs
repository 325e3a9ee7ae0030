//! Storage trait consumed by the monitoring core
//!
//! Every method is one unit of work against the store; implementations must
//! not hold a connection or transaction open between calls.

use std::collections::HashMap;

use async_trait::async_trait;

use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, ObservationRow};
use crate::outcome::Status;
use crate::target::{NewTarget, Target};

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Persistence used by the scheduler, the result sink and the dispatcher
///
/// Implementations must be `Send + Sync`; every check of a cycle calls into
/// the store from its own task.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// All targets with `enabled = 1`, configs as stored (still encrypted).
    async fn get_enabled_targets(&self) -> StorageResult<Vec<Target>>;

    /// Append one observation. `value_json` is the serialized metric document.
    async fn insert_observation(
        &self,
        target_id: i64,
        metric_type: &str,
        value_json: &str,
        status: Status,
    ) -> StorageResult<i64>;

    /// Append one `pending` alert and return its id.
    async fn insert_alert(&self, target_id: i64, alert_type: &str, message: &str)
    -> StorageResult<i64>;

    /// Read a `system_config` value.
    async fn get_config(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_config(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Register a target. The config is stored exactly as given, so callers
    /// encrypt credentials first.
    async fn insert_target(&self, target: NewTarget) -> StorageResult<i64>;

    /// Most recent observations of a target, newest first.
    async fn latest_observations(
        &self,
        target_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRow>>;

    /// Alerts raised for a target, oldest first.
    async fn alerts_for(&self, target_id: i64) -> StorageResult<Vec<AlertRow>>;

    /// Cheap round trip telling whether the backend can serve the core.
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend
    ///
    /// Releases pooled connections. Called once on the shutdown path.
    async fn close(&self) -> StorageResult<()>;
}

/// Run the backend's health check and turn an unhealthy answer into an error.
///
/// Called once at startup so a broken database fails fast instead of
/// surfacing as a failed write in every check of the first cycle.
pub async fn ensure_healthy(store: &dyn MonitorStore) -> StorageResult<HealthStatus> {
    let status = store.health_check().await?;
    if !status.healthy {
        return Err(StorageError::Unavailable(status.message));
    }
    Ok(status)
}
