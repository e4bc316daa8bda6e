//! Operator alerting channels.
//!
//! System-category failures (ledger down, signer misconfigured) page the
//! operator through a webhook; when no webhook is configured, alerts fall
//! back to the structured log so they are never silently dropped.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, warn};

use crate::domain::{AppError, OperatorAlerter};

/// Posts alerts to an operator-supplied webhook (PagerDuty, Slack, etc).
pub struct WebhookAlerter {
    http: reqwest::Client,
    webhook_url: String,
    service_name: String,
}

impl WebhookAlerter {
    pub fn new(webhook_url: String, service_name: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build alert client: {e}")))?;
        Ok(Self {
            http,
            webhook_url,
            service_name,
        })
    }
}

#[async_trait]
impl OperatorAlerter for WebhookAlerter {
    async fn system_alert(&self, context: &str, alert_error: &AppError) {
        let body = serde_json::json!({
            "service": self.service_name,
            "severity": "critical",
            "context": context,
            "error": alert_error.to_string(),
            "timestamp": Utc::now(),
        });

        // Alert delivery is best-effort; a failed page must not take the
        // billing path down with it.
        match self.http.post(&self.webhook_url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                error!(
                    status = %response.status(),
                    context,
                    "Operator alert webhook rejected the alert"
                );
            }
            Err(e) => {
                error!(error = %e, context, "Failed to deliver operator alert");
            }
        }
    }
}

/// Log-only alerter used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogAlerter;

#[async_trait]
impl OperatorAlerter for LogAlerter {
    async fn system_alert(&self, context: &str, alert_error: &AppError) {
        warn!(context, error = %alert_error, "SYSTEM ALERT (no webhook configured)");
    }
}
