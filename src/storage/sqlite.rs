//! SQLite storage backend implementation
//!
//! The database file is shared with the web layer, which owns the target
//! registry and the `system_config` table. This backend reads targets and
//! settings and appends observations and alerts.
//!
//! ## Features
//!
//! - **WAL mode**: the web layer keeps reading while checks write
//! - **Connection pooling**: every operation checks out one connection for
//!   its own statement and returns it immediately
//! - **Migrations**: automatic schema versioning with sqlx

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde_json::Value;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, MonitorStore};
use super::error::{StorageError, StorageResult};
use super::schema::{AlertRow, AlertState, ObservationRow};
use crate::outcome::Status;
use crate::target::{NewTarget, Target, TargetConfig, TargetKind};

/// SQLite storage backend
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations.
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn target_from_row(row: &SqliteRow) -> StorageResult<Target> {
        let id: i64 = row.try_get("id")?;
        let kind: String = row.try_get("type")?;
        let raw_config: String = row.try_get("config")?;

        // A broken document must not hide the target from the cycle; the
        // empty config fails validation and is recorded as an error.
        let config = match serde_json::from_str::<Value>(&raw_config) {
            Ok(Value::Object(config)) => config,
            _ => {
                warn!("target {id} has an invalid config document");
                TargetConfig::new()
            }
        };

        Ok(Target {
            id,
            name: row.try_get("name")?,
            kind: TargetKind::from_type(&kind),
            config,
            enabled: row.try_get("enabled")?,
        })
    }

    fn observation_from_row(row: &SqliteRow) -> StorageResult<ObservationRow> {
        let status: String = row.try_get("status")?;
        let metric_value: String = row.try_get("metric_value")?;
        let created_at: NaiveDateTime = row.try_get("created_at")?;

        Ok(ObservationRow {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            metric_type: row.try_get("metric_type")?,
            metric_value: serde_json::from_str(&metric_value)?,
            status: status.parse().map_err(StorageError::SerializationError)?,
            created_at: created_at.and_utc(),
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertRow> {
        let status: String = row.try_get("status")?;
        let created_at: NaiveDateTime = row.try_get("created_at")?;

        Ok(AlertRow {
            id: row.try_get("id")?,
            target_id: row.try_get("target_id")?,
            alert_type: row.try_get("alert_type")?,
            message: row.try_get("message")?,
            status: status
                .parse::<AlertState>()
                .map_err(StorageError::SerializationError)?,
            created_at: created_at.and_utc(),
        })
    }
}

#[async_trait]
impl MonitorStore for SqliteStore {
    #[instrument(skip(self))]
    async fn get_enabled_targets(&self) -> StorageResult<Vec<Target>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, type, config, enabled
            FROM monitor_targets
            WHERE enabled = 1
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let targets = rows
            .iter()
            .map(Self::target_from_row)
            .collect::<StorageResult<Vec<_>>>()?;
        debug!("loaded {} enabled targets", targets.len());
        Ok(targets)
    }

    #[instrument(skip(self, value_json), fields(status = %status))]
    async fn insert_observation(
        &self,
        target_id: i64,
        metric_type: &str,
        value_json: &str,
        status: Status,
    ) -> StorageResult<i64> {
        let result = sqlx::query(
            "INSERT INTO monitor_data (target_id, metric_type, metric_value, status) VALUES (?, ?, ?, ?)",
        )
        .bind(target_id)
        .bind(metric_type)
        .bind(value_json)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self, message))]
    async fn insert_alert(
        &self,
        target_id: i64,
        alert_type: &str,
        message: &str,
    ) -> StorageResult<i64> {
        let result = sqlx::query(
            "INSERT INTO alerts (target_id, alert_type, message, status) VALUES (?, ?, ?, ?)",
        )
        .bind(target_id)
        .bind(alert_type)
        .bind(message)
        .bind(AlertState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn get_config(&self, key: &str) -> StorageResult<Option<String>> {
        let value: Option<(String,)> =
            sqlx::query_as("SELECT value FROM system_config WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(value.map(|(value,)| value))
    }

    #[instrument(skip(self, value))]
    async fn set_config(&self, key: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO system_config (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    #[instrument(skip_all, fields(name = %target.name, kind = %target.kind))]
    async fn insert_target(&self, target: NewTarget) -> StorageResult<i64> {
        let config = serde_json::to_string(&target.config)?;

        let result = sqlx::query(
            "INSERT INTO monitor_targets (name, type, config, enabled) VALUES (?, ?, ?, ?)",
        )
        .bind(&target.name)
        .bind(target.kind.as_str())
        .bind(config)
        .bind(target.enabled)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(result.last_insert_rowid())
    }

    #[instrument(skip(self))]
    async fn latest_observations(
        &self,
        target_id: i64,
        limit: usize,
    ) -> StorageResult<Vec<ObservationRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_id, metric_type, metric_value, status, created_at
            FROM monitor_data
            WHERE target_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(target_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::observation_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn alerts_for(&self, target_id: i64) -> StorageResult<Vec<AlertRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, target_id, alert_type, message, status, created_at
            FROM alerts
            WHERE target_id = ?
            ORDER BY id
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        rows.iter().map(Self::alert_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(HealthStatus {
                    healthy: true,
                    message: "SQLite store operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite store");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn config(value: Value) -> TargetConfig {
        value.as_object().cloned().unwrap()
    }

    async fn store(dir: &tempfile::TempDir) -> SqliteStore {
        SqliteStore::new(dir.path().join("test.db")).await.unwrap()
    }

    async fn seed_target(store: &SqliteStore) -> i64 {
        store
            .insert_target(NewTarget::new("local", TargetKind::Server, TargetConfig::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_only_enabled_targets_are_loaded() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;

        let web = store
            .insert_target(NewTarget::new(
                "web",
                TargetKind::Application,
                config(json!({"url": "http://localhost"})),
            ))
            .await
            .unwrap();
        store
            .insert_target(
                NewTarget::new("old", TargetKind::Server, TargetConfig::new()).disabled(),
            )
            .await
            .unwrap();

        let targets = store.get_enabled_targets().await.unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].id, web);
        assert_eq!(targets[0].kind, TargetKind::Application);
        assert_eq!(targets[0].config["url"], "http://localhost");
        assert!(targets[0].enabled);
    }

    #[tokio::test]
    async fn test_broken_config_document_still_loads_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;

        sqlx::query("INSERT INTO monitor_targets (name, type, config) VALUES ('bad', 'ftp', 'not json')")
            .execute(&store.pool)
            .await
            .unwrap();

        let targets = store.get_enabled_targets().await.unwrap();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].kind, TargetKind::Unknown("ftp".to_string()));
        assert!(targets[0].config.is_empty());
    }

    #[tokio::test]
    async fn test_observations_are_appended() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;
        let id = seed_target(&store).await;

        store
            .insert_observation(id, "server", r#"{"cpu":12.5}"#, Status::Normal)
            .await
            .unwrap();
        store
            .insert_observation(id, "server", r#"{"error":"refused"}"#, Status::Offline)
            .await
            .unwrap();

        let rows = store.latest_observations(id, 10).await.unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, Status::Offline);
        assert_eq!(rows[0].metric_value, json!({"error": "refused"}));
        assert_eq!(rows[1].metric_value["cpu"], 12.5);
        assert!(store.latest_observations(id + 1, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alerts_start_pending() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;
        let target_id = seed_target(&store).await;

        let id = store
            .insert_alert(target_id, "cpu", "CPU usage high: 91%")
            .await
            .unwrap();

        let alerts = store.alerts_for(target_id).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, id);
        assert_eq!(alerts[0].status, AlertState::Pending);
        assert_eq!(alerts[0].alert_type, "cpu");
    }

    #[tokio::test]
    async fn test_system_config_upsert() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;

        assert_eq!(store.get_config("check_interval").await.unwrap(), None);

        store.set_config("check_interval", "30").await.unwrap();
        store.set_config("check_interval", "45").await.unwrap();

        assert_eq!(
            store.get_config("check_interval").await.unwrap().as_deref(),
            Some("45")
        );
    }

    #[tokio::test]
    async fn test_health_check() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store(&temp_dir).await;

        let health = store.health_check().await.unwrap();
        assert!(health.healthy);
        assert!(health.message.contains("operational"));

        store.close().await.unwrap();
        assert!(crate::storage::ensure_healthy(&store).await.is_err());
    }
}
