//! Running one check against one target
//!
//! [`CheckExecutor::execute`] never fails: bad configs, driver errors, panics
//! and overruns all come back as an [`Outcome`] with an `error` or `offline`
//! status, so every target yields exactly one observation.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, instrument, warn};

use crate::classify::classify;
use crate::config::Thresholds;
use crate::crypto::CredentialCipher;
use crate::outcome::{Outcome, Status};
use crate::probes::ProbeDriver;
use crate::target::{ProbeSpec, Target};

pub struct CheckExecutor {
    driver: Arc<dyn ProbeDriver>,
    cipher: Arc<dyn CredentialCipher>,
    thresholds: Thresholds,
    /// Outer bound on a whole check, above the drivers' own timeouts
    check_timeout: Duration,
}

impl CheckExecutor {
    pub fn new(
        driver: Arc<dyn ProbeDriver>,
        cipher: Arc<dyn CredentialCipher>,
        thresholds: Thresholds,
        check_timeout: Duration,
    ) -> Self {
        Self {
            driver,
            cipher,
            thresholds,
            check_timeout,
        }
    }

    /// Probe `target` and classify the result. `Outcome::elapsed` holds the
    /// wall-clock time of the whole check on every path.
    #[instrument(skip_all, fields(target = target.id, kind = %target.kind))]
    pub async fn execute(&self, target: &Target) -> Outcome {
        let start = Instant::now();
        let outcome = self.run(target).await;
        let elapsed = start.elapsed();

        debug!(
            "check finished as {} in {:.3}s",
            outcome.status,
            elapsed.as_secs_f64()
        );
        outcome.with_elapsed(elapsed)
    }

    async fn run(&self, target: &Target) -> Outcome {
        // decrypted copy lives only for the duration of this check
        let config = self.cipher.decrypt(&target.config);
        let spec = match ProbeSpec::from_config(&target.kind, config) {
            Ok(spec) => spec,
            Err(e) => {
                warn!("cannot check target: {e}");
                return Outcome::failure(e.status(), e.to_string());
            }
        };

        let probe = AssertUnwindSafe(self.driver.probe(&spec)).catch_unwind();
        match tokio::time::timeout(self.check_timeout, probe).await {
            Ok(Ok(Ok(outcome))) => classify(&target.kind, outcome, &self.thresholds),
            Ok(Ok(Err(e))) => {
                debug!("probe failed: {e}");
                Outcome::failure(e.status(), e.to_string())
            }
            Ok(Err(panic)) => {
                let reason = panic_message(panic.as_ref());
                warn!("probe panicked: {reason}");
                Outcome::failure(Status::Error, format!("probe panicked: {reason}"))
            }
            Err(_) => {
                warn!("check exceeded {:?}", self.check_timeout);
                Outcome::failure(
                    Status::Error,
                    format!("check timed out after {}s", self.check_timeout.as_secs_f64()),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
