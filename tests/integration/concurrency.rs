//! Worker pool bounds
//!
//! The pool is owned by the monitor, not by a cycle, so the bound holds
//! across overlapping manual and timer cycles too.

use std::sync::Arc;
use std::time::Duration;

use infra_monitor::storage::MemoryStore;
use pretty_assertions::assert_eq;

use crate::helpers::*;

async fn seeded(count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for index in 0..count {
        add_app(&*store, &format!("app-{index}"), &format!("http://app-{index}.local")).await;
    }
    store
}

#[tokio::test]
async fn test_pool_bounds_in_flight_checks() {
    let store = seeded(12).await;
    let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(100)));

    let report = monitor_with(&test_config(3), store.clone(), driver.clone())
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!(report.completed, 12);
    assert_eq!(driver.calls(), 12);
    // the pool fills up but never overflows
    assert_eq!(driver.peak(), 3);
}

#[tokio::test]
async fn test_hanging_checks_hold_the_pool_until_they_time_out() {
    let store = seeded(5).await;
    let mut driver = FakeDriver::new();
    for index in 0..5 {
        driver = driver.on(&format!("http://app-{index}.local"), Act::Hang);
    }
    let driver = Arc::new(driver);

    let report = monitor_with(&test_config(3), store.clone(), driver.clone())
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!(report.completed, 5);
    assert_eq!(driver.calls(), 5);
    assert_eq!(driver.peak(), 3);
}

#[tokio::test]
async fn test_single_worker_serializes_checks() {
    let store = seeded(5).await;
    let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(10)));

    monitor_with(&test_config(1), store, driver.clone())
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!(driver.peak(), 1);
}

#[tokio::test]
async fn test_zero_pool_size_still_makes_progress() {
    let store = seeded(2).await;
    let driver = Arc::new(FakeDriver::new());

    let report = monitor_with(&test_config(0), store, driver.clone())
        .run_cycle_now()
        .await
        .unwrap();

    assert_eq!(report.completed, 2);
    assert_eq!(driver.peak(), 1);
}

#[tokio::test]
async fn test_overlapping_timer_and_manual_cycles_share_the_pool() {
    let store = seeded(8).await;
    let driver = Arc::new(FakeDriver::new().with_delay(Duration::from_millis(40)));
    let monitor = monitor_with(&test_config(2), store.clone(), driver.clone());

    monitor.start(Duration::from_millis(10)).await;
    let manual = monitor.run_cycle_now().await.unwrap();
    monitor.shutdown().await;

    assert_eq!(manual.completed, 8);
    // the timer fired at least once while the manual cycle was running
    assert!(driver.calls() > 8, "only {} probes ran", driver.calls());
    assert_eq!(driver.peak(), 2);
}
