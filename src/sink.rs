//! Persistence of check results
//!
//! One observation per check, always written before any alert. Abnormal
//! outcomes are then handed to the [`AlertDispatcher`] with a message built
//! from the target kind and the outcome's metrics.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::alerts::{AlertDispatcher, Dispatch};
use crate::outcome::{Outcome, Status};
use crate::storage::{MonitorStore, StorageResult};
use crate::target::{Target, TargetKind};

/// What the sink wrote for one check
#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub observation_id: i64,
    pub alert: Option<Dispatch>,
}

pub struct ResultSink {
    store: Arc<dyn MonitorStore>,
    dispatcher: AlertDispatcher,
}

impl ResultSink {
    pub fn new(store: Arc<dyn MonitorStore>, dispatcher: AlertDispatcher) -> Self {
        Self { store, dispatcher }
    }

    /// Write the observation, then alert when the outcome asks for it.
    ///
    /// A storage failure on either write is returned; notification failures
    /// are only reported inside [`Dispatch`].
    #[instrument(skip_all, fields(target = target.id, status = %outcome.status))]
    pub async fn record(&self, target: &Target, outcome: &Outcome) -> StorageResult<Recorded> {
        let value_json = serde_json::to_string(&outcome.metrics)?;
        let observation_id = self
            .store
            .insert_observation(target.id, target.kind.as_str(), &value_json, outcome.status)
            .await?;
        debug!("stored observation {observation_id}");

        if !outcome.needs_alert() {
            return Ok(Recorded {
                observation_id,
                alert: None,
            });
        }

        let kind = match outcome.alert_kind {
            Some(kind) => kind.as_str(),
            None => target.kind.as_str(),
        };
        let message = alert_message(target, outcome);
        let dispatch = self
            .dispatcher
            .dispatch(target.id, &target.name, kind, &message)
            .await?;

        Ok(Recorded {
            observation_id,
            alert: Some(dispatch),
        })
    }
}

/// Human-readable alert text for an abnormal outcome.
pub fn alert_message(target: &Target, outcome: &Outcome) -> String {
    if let Some(message) = &outcome.alert_message {
        return message.clone();
    }

    let metric = |key: &str| outcome.metrics.get(key).and_then(Value::as_str);
    let detail = outcome
        .error()
        .map(|error| format!(" ({error})"))
        .unwrap_or_default();

    match (&target.kind, outcome.status) {
        (TargetKind::Server | TargetKind::Backup, Status::Offline) => format!(
            "remote connection failed: host {}{detail}",
            metric("host").unwrap_or("unknown")
        ),
        (TargetKind::Application, _) => {
            let url = metric("url")
                .or_else(|| target.config.get("url").and_then(Value::as_str))
                .unwrap_or("unknown url");
            match outcome.metrics.get("status_code").and_then(Value::as_u64) {
                Some(code) => format!("application unavailable: {url} (HTTP {code})"),
                None => format!("application unavailable: {url}{detail}"),
            }
        }
        (TargetKind::Database, Status::Offline) => format!(
            "database connection failed: {}{detail}",
            metric("host").unwrap_or("unknown")
        ),
        (kind, status) => format!("{kind} check {status}{detail}"),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::alerts::tests::RecordingNotifier;
    use crate::outcome::{AlertKind, Metrics};
    use crate::storage::{Fault, MemoryStore, StorageError};
    use crate::target::TargetConfig;
    use crate::webhook::DeliveryReport;

    fn target(kind: TargetKind) -> Target {
        Target {
            id: 7,
            name: "edge-1".to_string(),
            kind,
            config: TargetConfig::new(),
            enabled: true,
        }
    }

    fn sink(store: &Arc<MemoryStore>, answer: DeliveryReport) -> ResultSink {
        let dispatcher = AlertDispatcher::new(
            store.clone(),
            RecordingNotifier::answering(answer),
            Some("http://hook.local".to_string()),
        );
        ResultSink::new(store.clone(), dispatcher)
    }

    #[tokio::test]
    async fn test_normal_outcome_writes_observation_only() {
        let store = Arc::new(MemoryStore::new());
        let outcome = Outcome::normal(Metrics::new()).with_metric("cpu", 12.0);

        let recorded = sink(&store, DeliveryReport::Delivered)
            .record(&target(TargetKind::Server), &outcome)
            .await
            .unwrap();

        assert_eq!(recorded.alert, None);
        let observations = store.observations().await;
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].metric_type, "server");
        assert_eq!(observations[0].metric_value["cpu"], 12.0);
        assert!(store.alerts().await.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_alert_uses_outcome_kind_and_message() {
        let store = Arc::new(MemoryStore::new());
        let outcome = Outcome::normal(Metrics::new())
            .with_status(Status::Warning)
            .with_alert(Some(AlertKind::Cpu), "CPU usage high: 91%");

        sink(&store, DeliveryReport::Delivered)
            .record(&target(TargetKind::Server), &outcome)
            .await
            .unwrap();

        let alerts = store.alerts().await;
        assert_eq!(alerts[0].alert_type, "cpu");
        assert_eq!(alerts[0].message, "CPU usage high: 91%");
    }

    #[tokio::test]
    async fn test_failed_webhook_keeps_both_rows() {
        let store = Arc::new(MemoryStore::new());
        let outcome = Outcome::failure(Status::Offline, "connection refused")
            .with_metric("host", "10.1.2.3");

        let recorded = sink(&store, DeliveryReport::Failed("500".into()))
            .record(&target(TargetKind::Server), &outcome)
            .await
            .unwrap();

        assert_matches!(recorded.alert, Some(Dispatch { delivery: DeliveryReport::Failed(_), .. }));
        assert_eq!(store.observations().await.len(), 1);
        let alerts = store.alerts().await;
        assert_eq!(alerts[0].alert_type, "server");
        assert_eq!(
            alerts[0].message,
            "remote connection failed: host 10.1.2.3 (connection refused)"
        );
    }

    #[tokio::test]
    async fn test_observation_failure_skips_alert() {
        let store = Arc::new(MemoryStore::new());
        store.inject(Fault::Observations).await;
        let outcome = Outcome::failure(Status::Error, "boom");

        let result = sink(&store, DeliveryReport::Delivered)
            .record(&target(TargetKind::Server), &outcome)
            .await;

        assert_matches!(result, Err(StorageError::Unavailable(_)));
        assert!(store.alerts().await.is_empty());
    }

    #[test]
    fn test_crashed_application_check_names_configured_url() {
        let mut app = target(TargetKind::Application);
        app.config
            .insert("url".to_string(), Value::from("http://app.local/health"));
        let crashed = Outcome::failure(Status::Error, "check timed out after 30s");

        assert_eq!(
            alert_message(&app, &crashed),
            "application unavailable: http://app.local/health (check timed out after 30s)"
        );
        assert_eq!(
            alert_message(&target(TargetKind::Application), &crashed),
            "application unavailable: unknown url (check timed out after 30s)"
        );
    }

    #[test]
    fn test_messages_per_kind() {
        let http = Outcome::new(Status::Error, Metrics::new())
            .with_metric("url", "http://app.local/health")
            .with_metric("status_code", 503);
        assert_eq!(
            alert_message(&target(TargetKind::Application), &http),
            "application unavailable: http://app.local/health (HTTP 503)"
        );

        let db = Outcome::failure(Status::Offline, "timed out").with_metric("host", "10.0.0.9");
        assert_eq!(
            alert_message(&target(TargetKind::Database), &db),
            "database connection failed: 10.0.0.9 (timed out)"
        );

        let unknown = Outcome::failure(Status::Error, "invalid configuration: unsupported target type: ftp");
        assert_eq!(
            alert_message(&target(TargetKind::Unknown("ftp".into())), &unknown),
            "ftp check error (invalid configuration: unsupported target type: ftp)"
        );
    }
}
