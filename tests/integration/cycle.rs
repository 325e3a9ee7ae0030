//! Cycle behaviour with misbehaving targets
//!
//! Whatever a probe does (fail, panic, hang, or never run because its config
//! is unusable), the cycle writes exactly one observation per enabled target.

use std::sync::Arc;
use std::time::Duration;

use infra_monitor::{
    NewTarget, Status, TargetKind,
    storage::{MemoryStore, MonitorStore},
};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::helpers::*;

#[tokio::test]
async fn test_one_observation_per_target_whatever_the_probe_does() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(
        FakeDriver::new()
            .on("http://down.local", Act::Down)
            .on("http://panic.local", Act::Panic)
            .on("http://hang.local", Act::Hang),
    );

    let up = add_app(&*store, "up", "http://up.local").await;
    let down = add_app(&*store, "down", "http://down.local").await;
    let panics = add_app(&*store, "panics", "http://panic.local").await;
    let hangs = add_app(&*store, "hangs", "http://hang.local").await;
    let unknown = store
        .insert_target(NewTarget::new("ftp", TargetKind::Unknown("ftp".into()), config_of(json!({}))))
        .await
        .unwrap();
    let no_url = store
        .insert_target(NewTarget::new("no-url", TargetKind::Application, config_of(json!({}))))
        .await
        .unwrap();

    let monitor = monitor_with(&test_config(4), store.clone(), driver);
    let report = monitor.run_cycle_now().await.unwrap();

    assert_eq!((report.completed, report.failed, report.total), (6, 0, 6));

    let expected = [
        (up, Status::Normal),
        (down, Status::Offline),
        (panics, Status::Error),
        (hangs, Status::Error),
        (unknown, Status::Error),
        (no_url, Status::Error),
    ];
    for (id, status) in expected {
        let rows = store.latest_observations(id, 10).await.unwrap();
        assert_eq!(rows.len(), 1, "target {id}");
        assert_eq!(rows[0].status, status, "target {id}");
    }

    let hung = store.latest_observations(hangs, 1).await.unwrap();
    assert!(
        hung[0].metric_value["error"]
            .as_str()
            .unwrap()
            .starts_with("check timed out")
    );
    let unsupported = store.latest_observations(unknown, 1).await.unwrap();
    assert_eq!(unsupported[0].metric_type, "ftp");

    // every abnormal target raised exactly one alert
    assert_eq!(store.alerts().await.len(), 5);
    assert!(store.alerts_for(up).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alert_messages_describe_the_failure() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(
        FakeDriver::new()
            .on("http://down.local", Act::Down)
            .on("http://panic.local", Act::Panic),
    );
    let down = add_app(&*store, "down", "http://down.local").await;
    let panics = add_app(&*store, "panics", "http://panic.local").await;

    monitor_with(&test_config(2), store.clone(), driver)
        .run_cycle_now()
        .await
        .unwrap();

    let down_alerts = store.alerts_for(down).await.unwrap();
    assert_eq!(down_alerts[0].alert_type, "application");
    assert_eq!(
        down_alerts[0].message,
        "application unavailable: http://down.local (connection refused)"
    );

    let panic_alerts = store.alerts_for(panics).await.unwrap();
    assert_eq!(
        panic_alerts[0].message,
        "application unavailable: http://panic.local (probe panicked: probe crashed on http://panic.local)"
    );
}

#[tokio::test]
async fn test_disabled_targets_are_not_probed() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(FakeDriver::new());
    add_app(&*store, "on", "http://on.local").await;
    let off = store
        .insert_target(
            NewTarget::new("off", TargetKind::Application, app_config("http://off.local")).disabled(),
        )
        .await
        .unwrap();

    let report = monitor_with(&test_config(2), store.clone(), driver.clone())
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(driver.calls(), 1);
    assert!(store.latest_observations(off, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timer_and_manual_cycles_agree() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(FakeDriver::new().on("http://down.local", Act::Down));
    add_app(&*store, "up", "http://up.local").await;
    add_app(&*store, "down", "http://down.local").await;

    let monitor = monitor_with(&test_config(2), store.clone(), driver);
    let mut reports = monitor.subscribe_reports();

    assert!(monitor.start(Duration::from_millis(50)).await);
    let timed = tokio::time::timeout(Duration::from_secs(5), reports.recv())
        .await
        .unwrap()
        .unwrap();
    monitor.shutdown().await;

    let manual = monitor.run_cycle_now().await.unwrap();

    assert_eq!(
        (timed.completed, timed.failed, timed.total),
        (manual.completed, manual.failed, manual.total)
    );
    assert_eq!((manual.completed, manual.total), (2, 2));
}

#[tokio::test]
async fn test_overlapping_manual_cycles_each_record_everything() {
    let store = Arc::new(MemoryStore::new());
    let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(20)));
    for index in 0..4 {
        add_app(&*store, &format!("app-{index}"), &format!("http://app-{index}.local")).await;
    }

    let monitor = monitor_with(&test_config(3), store.clone(), driver.clone());
    let (first, second) = tokio::join!(monitor.run_cycle_now(), monitor.run_cycle_now());

    assert_eq!(first.unwrap().completed, 4);
    assert_eq!(second.unwrap().completed, 4);
    assert_eq!(store.observations().await.len(), 8);
    assert_eq!(driver.calls(), 8);
}

#[tokio::test]
async fn test_shutdown_without_start_is_harmless() {
    let store = Arc::new(MemoryStore::new());
    let monitor = monitor_with(&test_config(1), store, Arc::new(FakeDriver::new()));

    monitor.shutdown().await;
    assert!(!monitor.is_running().await);
}
