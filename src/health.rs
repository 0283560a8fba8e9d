//! Health probing against the application's HTTP health endpoint.
//!
//! Two consumers: the startup wait (a fixed number of polls before the
//! application is considered failed) and the background monitor, which
//! counts consecutive failures once the application is up.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::HealthConfig;
use crate::error::{Result, TmsError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    url: String,
    client: reqwest::Client,
}

impl HealthProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TmsError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    pub fn for_app(config: &HealthConfig, port: u16) -> Result<Self> {
        Self::new(config.url_for_port(port), config.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// One GET against the health endpoint. Transport errors are reported as
    /// `Unhealthy`, never as `Err`.
    pub async fn check(&self) -> HealthStatus {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => {
                if let Ok(body) = resp.json::<serde_json::Value>().await {
                    if let Some(status) = body.get("status") {
                        debug!(url = %self.url, "Health endpoint reports status {}", status);
                    }
                }
                HealthStatus::Healthy
            }
            Ok(resp) => HealthStatus::Unhealthy(format!("HTTP {}", resp.status().as_u16())),
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        }
    }

    /// Polls until the endpoint answers 2xx. Returns the attempt number that
    /// succeeded.
    pub async fn wait_until_healthy(&self, attempts: u32, interval: Duration) -> Result<u32> {
        let mut last = String::from("no attempt made");
        for attempt in 1..=attempts {
            match self.check().await {
                HealthStatus::Healthy => {
                    info!(attempt, url = %self.url, "Application is healthy");
                    return Ok(attempt);
                }
                HealthStatus::Unhealthy(reason) => {
                    debug!(attempt, attempts, "Health check not passing yet: {}", reason);
                    last = reason;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(TmsError::HealthCheckTimeout { attempts, last })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorOutcome {
    Shutdown,
    /// Consecutive failures that tripped the threshold.
    Unhealthy(u32),
}

/// Spawn the background health monitor.
///
/// Returns once `threshold` consecutive checks fail and `exit_on_unhealthy`
/// is set, or when the shutdown signal arrives.
pub fn spawn_monitor(
    probe: HealthProbe,
    interval: Duration,
    threshold: u32,
    exit_on_unhealthy: bool,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<MonitorOutcome> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately; the startup wait already probed.
        ticker.tick().await;
        let mut failures: u32 = 0;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match probe.check().await {
                        HealthStatus::Healthy => {
                            if failures > 0 {
                                info!(after = failures, "Application recovered");
                            }
                            failures = 0;
                        }
                        HealthStatus::Unhealthy(reason) => {
                            failures += 1;
                            warn!(failures, threshold, "Health check failed: {}", reason);
                            if failures >= threshold {
                                if exit_on_unhealthy {
                                    error!(failures, "Application unhealthy, giving up");
                                    return MonitorOutcome::Unhealthy(failures);
                                }
                                error!(failures, "Application unhealthy");
                                failures = 0;
                            }
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    debug!("health monitor shutting down");
                    return MonitorOutcome::Shutdown;
                }
            }
        }
    })
}
