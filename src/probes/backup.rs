//! Backup inventory over a remote shell session
//!
//! Lists the files matching a glob in one directory and reports their count,
//! total size and the age of the newest one. A missing or stale backup is an
//! alert on a healthy probe, not a probe failure.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::config::SshTimeouts;
use crate::outcome::{AlertKind, Metrics, Outcome, Status};
use crate::target::BackupSpec;

use super::shell::{self, ShellConnector};
use super::ProbeError;

/// Files reported individually in the metric document
const LISTED_FILES: usize = 20;

fn listing_command(path: &str, pattern: &str) -> Result<String, ProbeError> {
    let path = shell::safe_path(path)?;
    let pattern = shell::safe_pattern(pattern)?;
    Ok(format!(
        "find {path} -maxdepth 1 -type f -name '{pattern}' -printf '%f|%s|%T@\\n' 2>/dev/null | sort -t'|' -k3 -r"
    ))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackupFile {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Parse `name|size|mtime` lines, newest first. Malformed lines are skipped.
pub fn parse_listing(output: &str) -> Vec<BackupFile> {
    let mut files: Vec<BackupFile> = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let parsed = parse_line(line);
            if parsed.is_none() {
                debug!("skipping malformed listing line: {line:?}");
            }
            parsed
        })
        .collect();
    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    files
}

fn parse_line(line: &str) -> Option<BackupFile> {
    // file names may contain '|', the two numeric fields cannot
    let mut fields = line.rsplitn(3, '|');
    let mtime: f64 = fields.next()?.parse().ok()?;
    let size: u64 = fields.next()?.parse().ok()?;
    let name = fields.next()?.to_string();
    if name.is_empty() || !mtime.is_finite() {
        return None;
    }

    let secs = mtime.trunc() as i64;
    let nanos = (mtime.fract() * 1e9) as u32;
    let modified = DateTime::from_timestamp(secs, nanos)?;
    Some(BackupFile {
        name,
        size,
        modified,
    })
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// Turn a listing into an outcome, raising an alert when nothing matched or
/// the newest file is older than the configured limit.
pub fn summarize(files: &[BackupFile], spec: &BackupSpec, now: DateTime<Utc>) -> Outcome {
    let total_size: u64 = files.iter().map(|f| f.size).sum();
    let listed: Vec<Value> = files
        .iter()
        .take(LISTED_FILES)
        .map(|f| {
            json!({
                "name": f.name,
                "size": f.size,
                "modified": f.modified.to_rfc3339(),
            })
        })
        .collect();

    let outcome = Outcome::normal(Metrics::new())
        .with_metric("host", spec.shell.host.clone())
        .with_metric("backup_path", spec.backup_path.clone())
        .with_metric("total_count", files.len())
        .with_metric("total_size", total_size)
        .with_metric("total_size_human", human_size(total_size))
        .with_metric("files", listed);

    let Some(newest) = files.first() else {
        return outcome.with_status(Status::Warning).with_alert(
            Some(AlertKind::Backup),
            format!(
                "no backup files matching '{}' in {} on {}",
                spec.file_pattern, spec.backup_path, spec.shell.host
            ),
        );
    };

    let age_hours = (now - newest.modified).num_seconds() as f64 / 3600.0;
    let age_hours = (age_hours * 100.0).round() / 100.0;
    let outcome = outcome
        .with_metric("newest_file", newest.name.clone())
        .with_metric("newest_time", newest.modified.to_rfc3339())
        .with_metric("newest_age_hours", age_hours);

    if age_hours > spec.max_age_hours {
        return outcome.with_status(Status::Warning).with_alert(
            Some(AlertKind::Backup),
            format!(
                "latest backup {} in {} on {} is {:.1}h old (limit {}h)",
                newest.name, spec.backup_path, spec.shell.host, age_hours, spec.max_age_hours
            ),
        );
    }

    outcome
}

pub struct BackupProbe {
    connector: Arc<dyn ShellConnector>,
    timeouts: SshTimeouts,
}

impl BackupProbe {
    pub fn new(connector: Arc<dyn ShellConnector>, timeouts: SshTimeouts) -> Self {
        Self {
            connector,
            timeouts,
        }
    }

    #[instrument(skip_all, fields(host = %spec.shell.host, path = %spec.backup_path))]
    pub async fn probe(&self, spec: &BackupSpec) -> Result<Outcome, ProbeError> {
        let command = listing_command(&spec.backup_path, &spec.file_pattern)?;

        let mut session = match self.connector.connect(&spec.shell).await {
            Ok(session) => session,
            Err(e @ (ProbeError::ConnectFailure(_) | ProbeError::AuthFailure(_))) => {
                return Ok(Outcome::failure(Status::Offline, e.to_string())
                    .with_metric("host", spec.shell.host.clone()));
            }
            Err(e) => return Err(e),
        };

        let listing = session.exec(&command, self.timeouts.listing).await;
        session.close().await;

        let files = parse_listing(&listing?);
        debug!("found {} backup files", files.len());
        Ok(summarize(&files, spec, Utc::now()))
    }
}
