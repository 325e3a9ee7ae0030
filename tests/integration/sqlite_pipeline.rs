//! End-to-end cycles against a real SQLite store
//!
//! These use the production driver set wherever the target can be reached
//! locally: HTTP via wiremock, SQLite business queries via a scratch file,
//! and a refusing shell transport for remote servers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fernet::Fernet;
use infra_monitor::{
    Monitor, NewTarget, Status, TargetKind,
    alerts::WEBHOOK_CONFIG_KEY,
    config::{MonitorConfig, Timeouts, WebhookTimeouts},
    crypto::{CredentialCipher, PlaintextCipher, SecretBox},
    probes::{DriverSet, ProbeError, ShellConnector, ShellSession},
    storage::{AlertState, MonitorStore, SqliteStore},
    target::ShellTarget,
    webhook::WebhookNotifier,
};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::*;

async fn store_in(dir: &TempDir) -> Arc<SqliteStore> {
    Arc::new(SqliteStore::new(dir.path().join("monitor.db")).await.unwrap())
}

/// Shell transport that refuses every connection and remembers the
/// credentials it was offered.
#[derive(Default)]
struct Refusing {
    offered: Mutex<Vec<Option<String>>>,
}

#[async_trait]
impl ShellConnector for Refusing {
    async fn connect(&self, target: &ShellTarget) -> Result<Box<dyn ShellSession>, ProbeError> {
        self.offered.lock().unwrap().push(target.password.clone());
        Err(ProbeError::ConnectFailure("no route to host".into()))
    }
}

fn production_monitor(
    store: Arc<SqliteStore>,
    connector: Arc<dyn ShellConnector>,
    cipher: Arc<dyn CredentialCipher>,
) -> Monitor {
    let config = MonitorConfig::default();
    let timeouts = Timeouts::default();
    Monitor::new(
        &config,
        store,
        Arc::new(DriverSet::with_connector(&timeouts, connector)),
        cipher,
        Arc::new(WebhookNotifier::new(WebhookTimeouts::default())),
    )
}

#[tokio::test]
async fn test_alert_row_survives_failed_webhook() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir).await;
    let hook = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&hook)
        .await;
    store
        .set_config(WEBHOOK_CONFIG_KEY, &format!("{}/hook", hook.uri()))
        .await
        .unwrap();

    let down = add_app(&*store, "web", "http://down.local").await;
    let driver = Arc::new(FakeDriver::new().on("http://down.local", Act::Down));
    let report = monitor_with(&test_config(2), store.clone(), driver)
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!((report.completed, report.failed), (1, 0));

    let observations = store.latest_observations(down, 10).await.unwrap();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].status, Status::Offline);
    assert_eq!(observations[0].metric_type, "application");

    let alerts = store.alerts_for(down).await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].status, AlertState::Pending);
    assert_eq!(alerts[0].alert_type, "application");

    let requests = hook.received_requests().await.unwrap();
    let body: Value = requests[0].body_json().unwrap();
    assert_eq!(body["msgtype"], "text");
    assert_eq!(
        body["text"]["content"],
        "[Monitor Alert]\nweb\napplication unavailable: http://down.local (connection refused)"
    );
}

#[tokio::test]
async fn test_healthy_application_over_http() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir).await;
    let app = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&app)
        .await;
    let broken = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&broken)
        .await;

    let healthy = add_app(&*store, "app", &format!("{}/health", app.uri())).await;
    let failing = add_app(&*store, "broken", &format!("{}/health", broken.uri())).await;

    let monitor = production_monitor(
        store.clone(),
        Arc::new(Refusing::default()),
        Arc::new(PlaintextCipher),
    );
    monitor.run_cycle_now().await.unwrap();

    let ok = store.latest_observations(healthy, 1).await.unwrap();
    assert_eq!(ok[0].status, Status::Normal);
    assert_eq!(ok[0].metric_value["status_code"], 200);
    assert!(store.alerts_for(healthy).await.unwrap().is_empty());

    let bad = store.latest_observations(failing, 1).await.unwrap();
    assert_eq!(bad[0].status, Status::Error);
    let alerts = store.alerts_for(failing).await.unwrap();
    assert_eq!(
        alerts[0].message,
        format!("application unavailable: {}/health (HTTP 503)", broken.uri())
    );
}

#[tokio::test]
async fn test_business_query_against_sqlite_file() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir).await;

    let orders = dir.path().join("orders.db");
    let pool = SqlitePoolOptions::new()
        .connect_with(SqliteConnectOptions::new().filename(&orders).create_if_missing(true))
        .await
        .unwrap();
    sqlx::query("CREATE TABLE orders (id INTEGER PRIMARY KEY, reference TEXT, state TEXT)")
        .execute(&pool)
        .await
        .unwrap();
    for (id, state) in [(1, "stuck"), (2, "done"), (3, "stuck"), (4, "stuck")] {
        sqlx::query("INSERT INTO orders (id, reference, state) VALUES (?, ?, ?)")
            .bind(id)
            .bind(format!("ord-{id}"))
            .bind(state)
            .execute(&pool)
            .await
            .unwrap();
    }
    pool.close().await;

    let query = "SELECT id, reference FROM orders WHERE state = 'stuck' ORDER BY id";
    let target = store
        .insert_target(NewTarget::new(
            "stuck orders",
            TargetKind::Business,
            config_of(json!({
                "db_type": "sqlite",
                "database": orders.to_string_lossy(),
                "query": query,
            })),
        ))
        .await
        .unwrap();

    let monitor = production_monitor(
        store.clone(),
        Arc::new(Refusing::default()),
        Arc::new(PlaintextCipher),
    );
    monitor.run_cycle_now().await.unwrap();

    let observation = &store.latest_observations(target, 1).await.unwrap()[0];
    assert_eq!(observation.metric_type, "business");
    assert_eq!(observation.status, Status::Warning);
    assert_eq!(observation.metric_value["row_count"], 3);
    assert_eq!(observation.metric_value["value"], 1);

    let alerts = store.alerts_for(target).await.unwrap();
    assert_eq!(alerts[0].alert_type, "business");
    assert_eq!(
        alerts[0].message,
        "business metric abnormal: 1 (3 rows)\n  [1] 1, ord-1\n  [2] 3, ord-3\n  [3] 4, ord-4"
    );
}

#[tokio::test]
async fn test_unreachable_remote_server_with_sealed_password() {
    let dir = TempDir::new().unwrap();
    let store = store_in(&dir).await;
    let cipher = Arc::new(SecretBox::new(&Fernet::generate_key()).unwrap());

    let plain = config_of(json!({
        "is_remote": true,
        "host": "10.9.9.9",
        "username": "ops",
        "password": "hunter2",
    }));
    let sealed = cipher.encrypt(&plain);
    assert_ne!(sealed["password"], "hunter2");

    let target = store
        .insert_target(NewTarget::new("db-host", TargetKind::Server, sealed))
        .await
        .unwrap();

    let connector = Arc::new(Refusing::default());
    let monitor = production_monitor(store.clone(), connector.clone(), cipher);
    let report = monitor.run_cycle_now().await.unwrap();
    assert_eq!(report.completed, 1);

    assert_eq!(
        *connector.offered.lock().unwrap(),
        vec![Some("hunter2".to_string())]
    );

    let observation = &store.latest_observations(target, 1).await.unwrap()[0];
    assert_eq!(observation.status, Status::Offline);
    assert!(!observation.metric_value.to_string().contains("hunter2"));

    let alerts = store.alerts_for(target).await.unwrap();
    assert_eq!(alerts[0].alert_type, "server");
    assert_eq!(
        alerts[0].message,
        "remote connection failed: host 10.9.9.9 (connection failed: no route to host)"
    );

    let stored = store.get_enabled_targets().await.unwrap();
    assert_ne!(stored[0].config["password"], "hunter2");
}
