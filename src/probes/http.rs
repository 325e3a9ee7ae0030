//! HTTP application probe

use std::time::Instant;

use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};

use crate::config::HttpTimeouts;
use crate::outcome::{Metrics, Outcome, Status};
use crate::target::HttpSpec;

use super::ProbeError;

/// Issues a GET against the configured URL. Only `200 OK` counts as healthy;
/// any other status is `error`, and no response at all is `offline`.
///
/// Idle connections are never kept, so every check opens its own connection.
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(timeouts: HttpTimeouts) -> Self {
        let client = Client::builder()
            .timeout(timeouts.request)
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default http client: {e}");
                Client::new()
            });
        Self { client }
    }

    #[instrument(skip_all, fields(url = %spec.url))]
    pub async fn probe(&self, spec: &HttpSpec) -> Result<Outcome, ProbeError> {
        let start = Instant::now();

        let response = match self.client.get(&spec.url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!("request failed: {e}");
                return Ok(Outcome::failure(Status::Offline, e.to_string())
                    .with_metric("url", spec.url.clone()));
            }
        };

        let response_time = start.elapsed().as_secs_f64();
        let code = response.status();
        let (status, label) = if code == StatusCode::OK {
            (Status::Normal, "online")
        } else {
            (Status::Error, "error")
        };

        Ok(Outcome::new(status, Metrics::new())
            .with_metric("status", label)
            .with_metric("url", spec.url.clone())
            .with_metric("status_code", code.as_u16())
            .with_metric("response_time", (response_time * 1000.0).round() / 1000.0))
    }
}
