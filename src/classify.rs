//! Threshold classification of healthy probe results
//!
//! Drivers report raw readings; whether a reading is too high is decided here
//! against the configured [`Thresholds`]. Outcomes that already carry a
//! failure status are returned untouched.

use serde_json::Value;

use crate::config::Thresholds;
use crate::outcome::{AlertKind, Outcome, Status};
use crate::target::TargetKind;

struct Breach {
    kind: AlertKind,
    message: String,
}

/// Apply usage thresholds and the process presence rule to `outcome`.
pub fn classify(kind: &TargetKind, outcome: Outcome, thresholds: &Thresholds) -> Outcome {
    if outcome.status != Status::Normal {
        return outcome;
    }

    let breaches = match kind {
        TargetKind::Server => server_breaches(&outcome, thresholds),
        TargetKind::Storage => over(&outcome, "percent", thresholds.storage)
            .map(|percent| Breach {
                kind: AlertKind::Storage,
                message: format!("Storage usage high: {percent}%"),
            })
            .into_iter()
            .collect(),
        _ => Vec::new(),
    };

    match breaches.as_slice() {
        [] => outcome,
        [single] => outcome
            .with_status(Status::Warning)
            .with_alert(Some(single.kind), single.message.clone()),
        several => {
            let message = several
                .iter()
                .map(|breach| breach.message.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            outcome
                .with_status(Status::Warning)
                .with_alert(Some(AlertKind::Server), message)
        }
    }
}

fn server_breaches(outcome: &Outcome, thresholds: &Thresholds) -> Vec<Breach> {
    let mut breaches = Vec::new();

    if let Some(cpu) = over(outcome, "cpu", thresholds.cpu) {
        breaches.push(Breach {
            kind: AlertKind::Cpu,
            message: format!("CPU usage high: {cpu}%"),
        });
    }
    if let Some(memory) = over(outcome, "memory", thresholds.memory) {
        breaches.push(Breach {
            kind: AlertKind::Memory,
            message: format!("Memory usage high: {memory}%"),
        });
    }
    if let Some(disk) = over(outcome, "disk", thresholds.disk) {
        breaches.push(Breach {
            kind: AlertKind::Disk,
            message: format!("Disk usage high: {disk}%"),
        });
    }

    if outcome.metrics.get("process_running") == Some(&Value::Bool(false)) {
        let name = outcome
            .metrics
            .get("process_name")
            .and_then(Value::as_str)
            .unwrap_or("configured process");
        let host = outcome
            .metrics
            .get("host")
            .and_then(Value::as_str)
            .unwrap_or("local host");
        breaches.push(Breach {
            kind: AlertKind::Process,
            message: format!("Process not running: {name} on {host}"),
        });
    }

    breaches
}

/// The reading under `key` when it is numeric and strictly above `limit`.
fn over(outcome: &Outcome, key: &str, limit: f64) -> Option<f64> {
    outcome
        .metrics
        .get(key)
        .and_then(Value::as_f64)
        .filter(|value| *value > limit)
}
