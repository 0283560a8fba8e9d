//! Delivery of execution reports to the TMS webhook endpoint.

use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WebhookConfig;
use crate::error::{Result, TmsError};
use crate::report::ExecutionReport;
use crate::signature::{SIGNATURE_HEADER, sign_payload};

pub const EVENT_HEADER: &str = "X-TMS-Event";
pub const DELIVERY_HEADER: &str = "X-TMS-Delivery";

/// Maximum response body kept in a rejection error
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub delivery_id: String,
    pub status: u16,
    pub attempts: u32,
}

pub struct WebhookClient {
    url: String,
    secret: Option<String>,
    max_retries: u32,
    retry_backoff: Duration,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                TmsError::ConfigError(
                    "webhook.url is not set (config file or TMS_WEBHOOK_URL)".into(),
                )
            })?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("tms_deploy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TmsError::ConfigError(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            url,
            secret: if config.has_valid_secret() {
                config.secret.clone()
            } else {
                None
            },
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            client,
        })
    }

    /// Validates, signs and posts `report`.
    ///
    /// Transport errors, 5xx and 429 are retried with exponential backoff;
    /// all attempts reuse one delivery id.
    pub async fn send(&self, report: &ExecutionReport) -> Result<DeliveryReceipt> {
        report.validate()?;

        let body = serde_json::to_vec(report)?;
        let signature = match &self.secret {
            Some(secret) => Some(sign_payload(secret, &body)?),
            None => None,
        };
        let delivery_id = Uuid::now_v7().to_string();
        let event = report.event_name();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            debug!(attempt, delivery_id = %delivery_id, event, "Posting webhook");

            let mut request = self
                .client
                .post(&self.url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(EVENT_HEADER, event)
                .header(DELIVERY_HEADER, &delivery_id)
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }

            let failure = match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        execution_id = %report.execution_id,
                        event,
                        attempts = attempt,
                        "Webhook delivered"
                    );
                    return Ok(DeliveryReceipt {
                        delivery_id,
                        status: resp.status().as_u16(),
                        attempts: attempt,
                    });
                }
                Ok(resp) if is_retryable(resp.status()) => {
                    format!("HTTP {}", resp.status().as_u16())
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let mut body = resp.text().await.unwrap_or_default();
                    truncate_utf8(&mut body, MAX_ERROR_BODY);
                    return Err(TmsError::WebhookRejected { status, body });
                }
                Err(e) => e.to_string(),
            };

            if attempt > self.max_retries {
                return Err(TmsError::WebhookFailed(format!(
                    "{} after {} attempts",
                    failure, attempt
                )));
            }

            let delay = self.backoff_for(attempt);
            warn!(attempt, ?delay, "Webhook delivery failed: {}, retrying", failure);
            tokio::time::sleep(delay).await;
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1)).min(64);
        self.retry_backoff.saturating_mul(factor)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn truncate_utf8(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}
