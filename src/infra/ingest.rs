//! Webhook re-ingestion over HTTP.
//!
//! Dead-letter reprocessing and operator replays push stored payloads back
//! through the same ingestion endpoint the provider originally delivered
//! to, so recovered events take the exact code path of a live delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{AppError, ExternalServiceError, WebhookIngestor};

/// Re-posts stored payloads to a provider's internal ingestion endpoint.
pub struct HttpWebhookIngestor {
    http: reqwest::Client,
    provider: String,
    ingest_url: String,
}

impl HttpWebhookIngestor {
    pub fn new(provider: String, ingest_url: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build ingest client: {e}")))?;
        Ok(Self {
            http,
            provider,
            ingest_url,
        })
    }

    /// Parse an `INGESTORS` environment value of the form
    /// `provider=url,provider=url`.
    pub fn from_env_value(value: &str) -> Result<Vec<Self>, AppError> {
        value
            .split(',')
            .filter(|pair| !pair.trim().is_empty())
            .map(|pair| {
                let (provider, url) = pair.split_once('=').ok_or_else(|| {
                    AppError::invalid_field("INGESTORS", format!("malformed entry '{pair}'"))
                })?;
                Self::new(provider.trim().to_string(), url.trim().to_string())
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct IngestAck {
    #[serde(default)]
    accepted: bool,
    #[serde(default)]
    message: Option<String>,
}

#[async_trait]
impl WebhookIngestor for HttpWebhookIngestor {
    fn handles_provider(&self, provider: &str) -> bool {
        self.provider.eq_ignore_ascii_case(provider)
    }

    #[instrument(skip(self, payload), fields(provider = %self.provider))]
    async fn ingest(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        debug!(event_id, "Re-ingesting stored webhook payload");

        let response = self
            .http
            .post(&self.ingest_url)
            .header("x-workspace-id", workspace_id.to_string())
            .header("x-event-id", event_id)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalService(ExternalServiceError::Unavailable(format!(
                    "ingest endpoint for {provider}: {e}"
                )))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalService(ExternalServiceError::InvalidResponse(
                format!("ingest endpoint returned {}", response.status()),
            )));
        }

        let ack: IngestAck = response.json().await.map_err(|e| {
            AppError::ExternalService(ExternalServiceError::InvalidResponse(format!(
                "unparseable ingest acknowledgement: {e}"
            )))
        })?;

        if !ack.accepted {
            return Err(AppError::ExternalService(ExternalServiceError::InvalidResponse(
                ack.message
                    .unwrap_or_else(|| "event rejected by ingest endpoint".to_string()),
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_value() {
        let ingestors =
            HttpWebhookIngestor::from_env_value("stripe=http://a/ingest, shopify=http://b/ingest")
                .unwrap();
        assert_eq!(ingestors.len(), 2);
        assert!(ingestors[0].handles_provider("stripe"));
        assert!(ingestors[0].handles_provider("STRIPE"));
        assert!(!ingestors[0].handles_provider("shopify"));
        assert!(ingestors[1].handles_provider("shopify"));

        assert!(HttpWebhookIngestor::from_env_value("no-equals-sign").is_err());
        assert!(HttpWebhookIngestor::from_env_value("").unwrap().is_empty());
    }
}
