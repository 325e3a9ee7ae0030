//! Check cycles: timer-driven and on demand
//!
//! A cycle loads the enabled targets, spawns one task per target and waits
//! for all of them. Every task takes a permit from a worker pool shared by
//! all cycles before probing, so a manual cycle that overlaps a timer cycle
//! never pushes the number of in-flight checks past the pool size.
//!
//! ```text
//! tick / run_cycle_now → load targets → spawn check × N → join all → CycleReport
//!                                            │
//!                         permit → execute → record → (alert)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore, broadcast, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::AlertDispatcher;
use crate::config::MonitorConfig;
use crate::crypto::CredentialCipher;
use crate::executor::CheckExecutor;
use crate::probes::ProbeDriver;
use crate::sink::{Recorded, ResultSink};
use crate::storage::{MonitorStore, StorageError, StorageResult};
use crate::target::Target;
use crate::webhook::Notifier;

/// `system_config` key holding the cycle interval in seconds
pub const INTERVAL_CONFIG_KEY: &str = "check_interval";

/// Tally of one finished cycle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Checks whose observation was stored
    pub completed: usize,
    /// Checks that could not be recorded
    pub failed: usize,
    pub total: usize,
    pub elapsed_seconds: f64,
}

/// Everything a single check needs, shared by all cycles
struct Pipeline {
    store: Arc<dyn MonitorStore>,
    executor: CheckExecutor,
    sink: ResultSink,
    pool: Semaphore,
}

impl Pipeline {
    #[instrument(skip_all)]
    async fn run_cycle(self: &Arc<Self>) -> StorageResult<CycleReport> {
        let started = Instant::now();
        let targets = self.store.get_enabled_targets().await?;
        if targets.is_empty() {
            debug!("no enabled targets");
            return Ok(CycleReport {
                completed: 0,
                failed: 0,
                total: 0,
                elapsed_seconds: started.elapsed().as_secs_f64(),
            });
        }

        let total = targets.len();
        let mut tasks = JoinSet::new();
        for target in targets {
            let pipeline = Arc::clone(self);
            tasks.spawn(async move { pipeline.check(target).await });
        }

        let mut completed = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => completed += 1,
                Ok(Err(e)) => {
                    failed += 1;
                    error!("check result could not be stored: {e}");
                }
                Err(e) => {
                    failed += 1;
                    error!("check task failed: {e}");
                }
            }
        }

        let report = CycleReport {
            completed,
            failed,
            total,
            elapsed_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "cycle finished: {} completed, {} failed, {} total in {:.2}s",
            report.completed, report.failed, report.total, report.elapsed_seconds
        );
        Ok(report)
    }

    async fn check(&self, target: Target) -> StorageResult<Recorded> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| StorageError::Unavailable("worker pool closed".to_string()))?;

        let outcome = self.executor.execute(&target).await;
        self.sink.record(&target, &outcome).await
    }
}

struct Timer {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// The monitoring service: owns the worker pool and the cycle timer
pub struct Monitor {
    pipeline: Arc<Pipeline>,
    timer: Mutex<Option<Timer>>,
    reports: broadcast::Sender<CycleReport>,
}

impl Monitor {
    pub fn new(
        config: &MonitorConfig,
        store: Arc<dyn MonitorStore>,
        driver: Arc<dyn ProbeDriver>,
        cipher: Arc<dyn CredentialCipher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let executor =
            CheckExecutor::new(driver, cipher, config.thresholds, config.check_timeout);
        let dispatcher = AlertDispatcher::new(store.clone(), notifier, config.webhook_url.clone());
        let sink = ResultSink::new(store.clone(), dispatcher);
        let pool = Semaphore::new(config.max_concurrent_checks.max(1));
        let (reports, _) = broadcast::channel(16);

        Self {
            pipeline: Arc::new(Pipeline {
                store,
                executor,
                sink,
                pool,
            }),
            timer: Mutex::new(None),
            reports,
        }
    }

    /// Start the cycle timer. The first cycle runs one interval from now.
    ///
    /// Returns `false` without changing anything when the timer already runs.
    pub async fn start(&self, interval: Duration) -> bool {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            info!("scheduler already running");
            return false;
        }

        let period = if interval.is_zero() {
            warn!("check interval of zero, using one second");
            Duration::from_secs(1)
        } else {
            interval
        };

        let (stop, mut stopped) = oneshot::channel();
        let pipeline = self.pipeline.clone();
        let reports = self.reports.clone();
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match pipeline.run_cycle().await {
                            Ok(report) => {
                                let _ = reports.send(report);
                            }
                            Err(e) => error!("cycle aborted: {e}"),
                        }
                    }
                    _ = &mut stopped => break,
                }
            }
            debug!("cycle timer stopped");
        });

        info!("scheduler started, check interval {}s", period.as_secs_f64());
        *timer = Some(Timer { stop, task });
        true
    }

    pub async fn is_running(&self) -> bool {
        self.timer.lock().await.is_some()
    }

    /// Run one cycle now, on the caller's task, and wait for it.
    ///
    /// Runs alongside a timer cycle if one is in progress; both draw from the
    /// same worker pool.
    pub async fn run_cycle_now(&self) -> StorageResult<CycleReport> {
        let report = self.pipeline.run_cycle().await?;
        let _ = self.reports.send(report);
        Ok(report)
    }

    /// Reports of every finished cycle, manual or timed.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<CycleReport> {
        self.reports.subscribe()
    }

    /// Stop the timer, letting a cycle in progress finish first.
    pub async fn shutdown(&self) {
        let Some(timer) = self.timer.lock().await.take() else {
            return;
        };
        let _ = timer.stop.send(());
        if let Err(e) = timer.task.await {
            error!("cycle timer ended abnormally: {e}");
        }
        info!("scheduler stopped");
    }
}

/// Cycle interval from `system_config`, or `default` when the key is
/// missing, unreadable or not a positive number of seconds.
pub async fn load_interval(store: &dyn MonitorStore, default: Duration) -> Duration {
    match store.get_config(INTERVAL_CONFIG_KEY).await {
        Ok(Some(value)) => match value.trim().parse::<u64>() {
            Ok(seconds) if seconds > 0 => Duration::from_secs(seconds),
            _ => {
                warn!("ignoring invalid {INTERVAL_CONFIG_KEY}: {value:?}");
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            warn!("cannot read {INTERVAL_CONFIG_KEY}: {e}");
            default
        }
    }
}
