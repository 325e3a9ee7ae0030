//! Remote host metrics over a shell session

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::config::SshTimeouts;
use crate::outcome::{Metrics, Outcome, Status};
use crate::target::RemoteServerSpec;

use super::shell::{self, ShellConnector, ShellSession};
use super::ProbeError;

const CPU_COMMAND: &str =
    "awk '/^cpu /{print 100-($5*100/($2+$3+$4+$5+$6+$7+$8))}' /proc/stat";

const MEMORY_COMMAND: &str =
    "awk '/MemTotal/{t=$2}/MemAvailable/{a=$2}END{print 100-100*a/t}' /proc/meminfo";

fn disk_command(path: &str) -> Result<String, ProbeError> {
    let path = shell::safe_path(path)?;
    Ok(format!("df {path} | tail -1 | awk '{{print $5}}' | sed 's/%//'"))
}

fn process_command(name: &str) -> Result<String, ProbeError> {
    let name = shell::safe_name(name)?;
    Ok(format!("ps aux | grep '{name}' | grep -v grep | wc -l"))
}

/// Reads cpu, memory and disk usage (and optionally process presence) from a
/// remote host. A metric whose command fails or prints garbage is recorded as
/// `null`; only a failed connection fails the probe.
pub struct RemoteServerProbe {
    connector: Arc<dyn ShellConnector>,
    timeouts: SshTimeouts,
}

impl RemoteServerProbe {
    pub fn new(connector: Arc<dyn ShellConnector>, timeouts: SshTimeouts) -> Self {
        Self {
            connector,
            timeouts,
        }
    }

    #[instrument(skip_all, fields(host = %spec.shell.host))]
    pub async fn probe(&self, spec: &RemoteServerSpec) -> Result<Outcome, ProbeError> {
        let disk_command = disk_command(&spec.disk_path)?;
        let process_command = spec
            .process_name
            .as_deref()
            .map(process_command)
            .transpose()?;
        let host = spec.shell.host.clone();

        let mut session = match self.connector.connect(&spec.shell).await {
            Ok(session) => session,
            Err(e @ (ProbeError::ConnectFailure(_) | ProbeError::AuthFailure(_))) => {
                debug!("remote host unreachable: {e}");
                return Ok(Outcome::failure(Status::Offline, e.to_string()).with_metric("host", host));
            }
            Err(e) => return Err(e),
        };

        let cpu = read_number(session.as_mut(), CPU_COMMAND, self.timeouts.command).await;
        let memory = read_number(session.as_mut(), MEMORY_COMMAND, self.timeouts.command).await;
        let disk = read_number(session.as_mut(), &disk_command, self.timeouts.command).await;
        let process_running = match &process_command {
            Some(command) => Some(
                read_number(session.as_mut(), command, self.timeouts.process)
                    .await
                    .map(|count| count > 0.0),
            ),
            None => None,
        };

        session.close().await;

        let mut outcome = Outcome::normal(Metrics::new())
            .with_metric("status", "online")
            .with_metric("host", host)
            .with_metric("cpu", cpu)
            .with_metric("memory", memory)
            .with_metric("disk", disk);
        if let (Some(name), Some(running)) = (&spec.process_name, process_running) {
            outcome = outcome
                .with_metric("process_name", name.clone())
                .with_metric("process_running", running);
        }
        Ok(outcome)
    }
}

/// Run a one-line command and parse its output as a number. Every failure
/// collapses to `None`.
pub(crate) async fn read_number(
    session: &mut dyn ShellSession,
    command: &str,
    limit: Duration,
) -> Option<f64> {
    let output = match session.exec(command, limit).await {
        Ok(output) => output,
        Err(e) => {
            debug!("remote command failed: {e}");
            return None;
        }
    };

    match output.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Some((value * 100.0).round() / 100.0),
        _ => {
            debug!("unparsable command output: {:?}", output.trim());
            None
        }
    }
}
