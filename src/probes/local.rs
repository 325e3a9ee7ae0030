//! Metrics of the host the monitor runs on

use std::ffi::OsStr;
use std::path::Path;

use sysinfo::{Disk, Disks, ProcessesToUpdate, System};
use tracing::{debug, instrument, warn};

use crate::outcome::{Metrics, Outcome};
use crate::target::{LocalServerSpec, StorageSpec};

use super::ProbeError;

/// A `sysinfo` handle owned by a single check and dropped when it ends.
struct Sampler {
    system: System,
}

impl Sampler {
    fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// CPU usage is a delta between two refreshes, so a fresh handle takes a
    /// baseline sample first.
    async fn cpu_percent(&mut self) -> f64 {
        self.system.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        self.system.refresh_cpu_usage();
        round(self.system.global_cpu_usage() as f64)
    }

    fn memory_percent(&mut self) -> Result<f64, ProbeError> {
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(ProbeError::ProtocolFailure(
                "total memory reported as zero".into(),
            ));
        }
        let available = self.system.available_memory();
        Ok(round(
            total.saturating_sub(available) as f64 * 100.0 / total as f64,
        ))
    }

    fn process_running(&mut self, name: &str) -> bool {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
        self.system
            .processes()
            .values()
            .any(|process| process.name() == OsStr::new(name))
    }
}

/// Reads cpu, memory, disk and process information through `sysinfo`.
///
/// Nothing is shared between checks: every call samples through its own
/// `System` handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProbe;

impl LocalProbe {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all)]
    pub async fn probe_server(&self, spec: &LocalServerSpec) -> Result<Outcome, ProbeError> {
        let mut sampler = Sampler::new();
        let cpu = sampler.cpu_percent().await;
        let memory = sampler.memory_percent()?;
        let disk = match DiskUsage::of(&spec.disk_path) {
            Ok(usage) => Some(usage.percent()),
            Err(e) => {
                warn!("disk usage unavailable: {e}");
                None
            }
        };

        let mut outcome = Outcome::normal(Metrics::new())
            .with_metric("cpu", cpu)
            .with_metric("memory", memory)
            .with_metric("disk", disk);
        if let Some(name) = &spec.process_name {
            outcome = outcome
                .with_metric("process_name", name.clone())
                .with_metric("process_running", sampler.process_running(name));
        }
        Ok(outcome)
    }

    #[instrument(skip_all, fields(path = %spec.path))]
    pub async fn probe_storage(&self, spec: &StorageSpec) -> Result<Outcome, ProbeError> {
        let usage = DiskUsage::of(&spec.path)?;
        debug!("storage usage: {}%", usage.percent());

        Ok(Outcome::normal(Metrics::new())
            .with_metric("path", spec.path.clone())
            .with_metric("total", usage.total)
            .with_metric("used", usage.used())
            .with_metric("free", usage.available)
            .with_metric("percent", usage.percent()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DiskUsage {
    total: u64,
    available: u64,
}

impl DiskUsage {
    /// Usage of the filesystem holding `path` (longest matching mount point).
    fn of(path: &str) -> Result<Self, ProbeError> {
        let path = Path::new(path);
        if !path.exists() {
            return Err(ProbeError::InvalidConfig(format!(
                "path {} does not exist",
                path.display()
            )));
        }
        let path = path.canonicalize().map_err(|e| {
            ProbeError::ProtocolFailure(format!("cannot resolve {}: {e}", path.display()))
        })?;

        let disks = Disks::new_with_refreshed_list();
        let disk = disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .ok_or_else(|| {
                ProbeError::ProtocolFailure(format!("no filesystem found for {}", path.display()))
            })?;
        Ok(Self::from_disk(disk))
    }

    fn from_disk(disk: &Disk) -> Self {
        Self {
            total: disk.total_space(),
            available: disk.available_space(),
        }
    }

    fn used(&self) -> u64 {
        self.total.saturating_sub(self.available)
    }

    fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round(self.used() as f64 * 100.0 / self.total as f64)
    }
}

fn round(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
