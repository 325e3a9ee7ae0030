//! Test helpers shared by the integration tests

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use infra_monitor::{
    Monitor, NewTarget, Outcome, Status, TargetKind,
    config::{MonitorConfig, WebhookTimeouts},
    crypto::PlaintextCipher,
    outcome::Metrics,
    probes::{ProbeDriver, ProbeError},
    storage::MonitorStore,
    target::{ProbeSpec, TargetConfig},
    webhook::WebhookNotifier,
};
use serde_json::{Value, json};

/// What the fake driver does for one application URL
#[derive(Debug, Clone, Copy)]
pub enum Act {
    Up,
    Down,
    Panic,
    /// Never answers within any sane check timeout
    Hang,
}

/// Probe driver for application targets that records how many probes ran
/// at the same time.
#[derive(Default)]
pub struct FakeDriver {
    acts: HashMap<String, Act>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every probe takes at least `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn on(mut self, url: &str, act: Act) -> Self {
        self.acts.insert(url.to_string(), act);
        self
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProbeDriver for FakeDriver {
    async fn probe(&self, spec: &ProbeSpec) -> Result<Outcome, ProbeError> {
        let ProbeSpec::Application(spec) = spec else {
            return Err(ProbeError::InvalidConfig("fake driver only probes applications".into()));
        };

        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        match self.acts.get(&spec.url).copied().unwrap_or(Act::Up) {
            Act::Up => Ok(Outcome::normal(Metrics::new())
                .with_metric("status", "online")
                .with_metric("url", spec.url.clone())
                .with_metric("status_code", 200)),
            Act::Down => Ok(Outcome::failure(Status::Offline, "connection refused")
                .with_metric("url", spec.url.clone())),
            Act::Panic => panic!("probe crashed on {}", spec.url),
            Act::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProbeError::TimeoutFailure("hung".into()))
            }
        }
    }
}

pub fn config_of(value: Value) -> TargetConfig {
    value.as_object().cloned().unwrap_or_default()
}

pub fn app_config(url: &str) -> TargetConfig {
    config_of(json!({ "url": url }))
}

/// Config with a small pool and a short check timeout
pub fn test_config(max_concurrent_checks: usize) -> MonitorConfig {
    MonitorConfig {
        max_concurrent_checks,
        check_timeout: Duration::from_millis(300),
        ..MonitorConfig::default()
    }
}

pub async fn add_app(store: &dyn MonitorStore, name: &str, url: &str) -> i64 {
    store
        .insert_target(NewTarget::new(name, TargetKind::Application, app_config(url)))
        .await
        .unwrap()
}

/// Monitor over `store` and `driver` with plaintext credentials and the
/// real webhook client.
pub fn monitor_with(
    config: &MonitorConfig,
    store: Arc<dyn MonitorStore>,
    driver: Arc<dyn ProbeDriver>,
) -> Monitor {
    Monitor::new(
        config,
        store,
        driver,
        Arc::new(PlaintextCipher),
        Arc::new(WebhookNotifier::new(WebhookTimeouts::default())),
    )
}
