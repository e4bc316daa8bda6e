//! Dead-letter reprocessing.
//!
//! Events land here after exhausting their inline delivery retries. Each
//! pass walks the pending batch, validates the stored payload, checks the
//! reprocessing ceiling and backoff window, suppresses idempotent
//! duplicates, and re-runs ingestion through the provider's ingestor.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, DeadLetterDisposition, DeadLetterMessage, DeadLetterReport, LedgerStore,
    WebhookIngestor,
};

#[derive(Debug, Clone)]
pub struct DeadLetterConfig {
    pub batch_size: i64,
    /// Reprocessing attempts before a message is parked for the operator
    pub max_retry_attempts: i32,
    pub backoff_base: Duration,
    pub backoff_multiplier: i32,
    pub backoff_cap: Duration,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_retry_attempts: 5,
            backoff_base: Duration::minutes(5),
            backoff_multiplier: 2,
            backoff_cap: Duration::hours(6),
        }
    }
}

/// Batch reprocessor for dead-lettered events.
pub struct DeadLetterProcessor {
    ledger: Arc<dyn LedgerStore>,
    ingestors: Vec<Arc<dyn WebhookIngestor>>,
    config: DeadLetterConfig,
}

impl DeadLetterProcessor {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        ingestors: Vec<Arc<dyn WebhookIngestor>>,
        config: DeadLetterConfig,
    ) -> Self {
        Self {
            ledger,
            ingestors,
            config,
        }
    }

    /// Process one batch of pending messages. Returns the per-disposition
    /// tally; `requeued > 0` means the batch should be re-delivered later.
    #[instrument(skip(self))]
    pub async fn process_batch(&self) -> Result<DeadLetterReport, AppError> {
        let messages = self.ledger.list_dead_letters(self.config.batch_size).await?;
        let mut report = DeadLetterReport {
            total: messages.len(),
            ..Default::default()
        };

        for message in messages {
            match self.process_message(&message).await? {
                DeadLetterDisposition::Resolved => report.resolved += 1,
                DeadLetterDisposition::Requeue => report.requeued += 1,
                DeadLetterDisposition::PermanentlyFailed => report.permanently_failed += 1,
            }
        }

        if report.total > 0 {
            info!(
                total = report.total,
                resolved = report.resolved,
                requeued = report.requeued,
                permanently_failed = report.permanently_failed,
                "Dead-letter batch processed"
            );
        }
        Ok(report)
    }

    async fn process_message(
        &self,
        message: &DeadLetterMessage,
    ) -> Result<DeadLetterDisposition, AppError> {
        // Malformed payloads can never succeed; park them immediately.
        if let Err(reason) = validate_payload(message) {
            warn!(message_id = %message.id, reason, "Malformed dead-letter payload");
            return self
                .park(message, &format!("malformed payload: {reason}"))
                .await;
        }

        if message.retry_attempt >= self.config.max_retry_attempts {
            warn!(
                message_id = %message.id,
                retry_attempt = message.retry_attempt,
                "Dead-letter reprocessing ceiling reached"
            );
            return self.park(message, "reprocessing ceiling reached").await;
        }

        // Still inside the backoff window: leave the row untouched so the
        // attempt counter only ever reflects real reprocessing attempts.
        let delay = reprocess_backoff(&self.config, message.retry_attempt);
        if Utc::now() < message.last_failed_at + delay {
            return Ok(DeadLetterDisposition::Requeue);
        }

        // Idempotent duplicate: the entity this event would create already
        // exists, so the original delivery partially succeeded.
        if self
            .ledger
            .entity_exists_for_event(message.workspace_id, &message.provider, &message.event_id)
            .await?
        {
            info!(
                message_id = %message.id,
                event_id = %message.event_id,
                "Dead-letter event already applied; resolving as duplicate"
            );
            self.ledger
                .record_dead_letter_outcome(message.id, DeadLetterDisposition::Resolved, None)
                .await?;
            return Ok(DeadLetterDisposition::Resolved);
        }

        let Some(ingestor) = self
            .ingestors
            .iter()
            .find(|ingestor| ingestor.handles_provider(&message.provider))
        else {
            return self
                .park(message, &format!("no ingestor for provider '{}'", message.provider))
                .await;
        };

        match ingestor
            .ingest(
                message.workspace_id,
                &message.provider,
                &message.event_id,
                &message.payload,
            )
            .await
        {
            Ok(()) => {
                self.ledger
                    .record_dead_letter_outcome(message.id, DeadLetterDisposition::Resolved, None)
                    .await?;
                Ok(DeadLetterDisposition::Resolved)
            }
            Err(e) => {
                warn!(
                    message_id = %message.id,
                    error = %e,
                    retry_attempt = message.retry_attempt + 1,
                    "Dead-letter reprocessing failed"
                );
                self.ledger
                    .record_dead_letter_outcome(
                        message.id,
                        DeadLetterDisposition::Requeue,
                        Some(&e.to_string()),
                    )
                    .await?;
                Ok(DeadLetterDisposition::Requeue)
            }
        }
    }

    async fn park(
        &self,
        message: &DeadLetterMessage,
        reason: &str,
    ) -> Result<DeadLetterDisposition, AppError> {
        self.ledger
            .record_dead_letter_outcome(
                message.id,
                DeadLetterDisposition::PermanentlyFailed,
                Some(reason),
            )
            .await?;
        Ok(DeadLetterDisposition::PermanentlyFailed)
    }
}

/// Reprocessing delay after `retry_attempt` prior failures.
fn reprocess_backoff(config: &DeadLetterConfig, retry_attempt: i32) -> Duration {
    if retry_attempt <= 0 {
        return Duration::zero();
    }
    let exponent = (retry_attempt - 1).clamp(0, 30) as u32;
    let factor = i64::from(config.backoff_multiplier).saturating_pow(exponent);
    let delay = config.backoff_base.num_seconds().saturating_mul(factor);
    Duration::seconds(delay.min(config.backoff_cap.num_seconds()))
}

/// Essential-field check for a stored event payload.
fn validate_payload(message: &DeadLetterMessage) -> Result<(), &'static str> {
    if message.event_id.trim().is_empty() {
        return Err("empty event id");
    }
    if message.provider.trim().is_empty() {
        return Err("empty provider");
    }
    if !message.payload.is_object() {
        return Err("payload is not a JSON object");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn message(payload: serde_json::Value) -> DeadLetterMessage {
        DeadLetterMessage {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            provider: "stripe".to_string(),
            event_id: "evt_1".to_string(),
            payload,
            failure_count: 3,
            last_failed_at: Utc::now(),
            retry_attempt: 0,
        }
    }

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(&message(serde_json::json!({"type": "x"}))).is_ok());
        assert!(validate_payload(&message(serde_json::json!("not an object"))).is_err());

        let mut m = message(serde_json::json!({}));
        m.event_id = " ".to_string();
        assert!(validate_payload(&m).is_err());
    }

    #[test]
    fn test_reprocess_backoff_growth() {
        let config = DeadLetterConfig::default();
        assert_eq!(reprocess_backoff(&config, 0), Duration::zero());
        assert_eq!(reprocess_backoff(&config, 1), Duration::minutes(5));
        assert_eq!(reprocess_backoff(&config, 2), Duration::minutes(10));
        assert_eq!(reprocess_backoff(&config, 3), Duration::minutes(20));
        assert_eq!(reprocess_backoff(&config, 20), Duration::hours(6));
    }
}
