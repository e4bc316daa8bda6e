//! Operator-driven error recovery: webhook replay and session recovery.
//!
//! Replays run the stored payload back through the normal ingestion path
//! under a fresh replay idempotency key, so a replay can never be confused
//! with (or overwrite) the original delivery. Session recovery either
//! resumes a stalled session in place or supersedes it with a restart.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{
    AppError, BillingSession, DatabaseError, LedgerStore, RecoverSessionRequest,
    RecoverSessionResponse, RecoveryStrategy, ReplayWebhookRequest, ReplayWebhookResponse,
    SessionStatus, WebhookIngestor, replay_idempotency_key,
};

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Replay attempts allowed per event before `force_replay` is required
    pub max_replay_attempts: i32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_replay_attempts: 3,
        }
    }
}

/// Manual recovery surface exposed to operators through the API.
pub struct ErrorRecoveryService {
    ledger: Arc<dyn LedgerStore>,
    ingestors: Vec<Arc<dyn WebhookIngestor>>,
    config: RecoveryConfig,
}

impl ErrorRecoveryService {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        ingestors: Vec<Arc<dyn WebhookIngestor>>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            ledger,
            ingestors,
            config,
        }
    }

    /// Replay a stored webhook event through the normal ingestion path.
    ///
    /// The original event row is never mutated; the attempt is recorded
    /// under a fresh timestamped replay key so repeated replays stay
    /// distinguishable in the audit trail.
    #[instrument(skip(self, request), fields(event_id = %request.event_id))]
    pub async fn replay_webhook_event(
        &self,
        request: &ReplayWebhookRequest,
    ) -> Result<ReplayWebhookResponse, AppError> {
        let event = self
            .ledger
            .get_webhook_event(request.workspace_id, &request.provider, &request.event_id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!(
                    "webhook event {} not found",
                    request.event_id
                )))
            })?;

        if event.replay_count >= self.config.max_replay_attempts && !request.force_replay {
            return Err(AppError::invalid_field(
                "force_replay",
                format!(
                    "event has been replayed {} times; set force_replay to bypass the ceiling",
                    event.replay_count
                ),
            ));
        }
        if request.force_replay && event.replay_count >= self.config.max_replay_attempts {
            warn!(
                event_id = %event.event_id,
                replay_count = event.replay_count,
                "Replay ceiling bypassed by operator"
            );
        }

        let replay_key = replay_idempotency_key(&event.event_id, Utc::now());

        let Some(ingestor) = self
            .ingestors
            .iter()
            .find(|ingestor| ingestor.handles_provider(&event.provider))
        else {
            return Err(AppError::NotSupported(format!(
                "no ingestor registered for provider '{}'",
                event.provider
            )));
        };

        let result = ingestor
            .ingest(
                event.workspace_id,
                &event.provider,
                &event.event_id,
                &event.payload,
            )
            .await;

        match result {
            Ok(()) => {
                self.ledger
                    .record_replay_attempt(&event, &replay_key, true, None)
                    .await?;
                info!(event_id = %event.event_id, replay_key = %replay_key, "Webhook replay succeeded");
                Ok(ReplayWebhookResponse {
                    replay_key,
                    success: true,
                    message: "event replayed successfully".to_string(),
                })
            }
            Err(e) => {
                let message = e.to_string();
                self.ledger
                    .record_replay_attempt(&event, &replay_key, false, Some(&message))
                    .await?;
                warn!(event_id = %event.event_id, error = %message, "Webhook replay failed");
                Ok(ReplayWebhookResponse {
                    replay_key,
                    success: false,
                    message,
                })
            }
        }
    }

    /// Recover a stalled or failed session by resuming it in place or
    /// superseding it with a restarted copy.
    #[instrument(skip(self, request))]
    pub async fn recover_session(
        &self,
        session_id: Uuid,
        request: &RecoverSessionRequest,
    ) -> Result<RecoverSessionResponse, AppError> {
        let strategy: RecoveryStrategy = request
            .strategy
            .parse()
            .map_err(|e: String| AppError::invalid_field("strategy", e))?;

        let session = self
            .ledger
            .get_session(session_id)
            .await?
            .ok_or_else(|| {
                AppError::Database(DatabaseError::NotFound(format!(
                    "session {session_id} not found"
                )))
            })?;

        if !session.status.is_recoverable() {
            return Err(AppError::invalid_field(
                "session_id",
                format!("session is {}; only running or failed sessions are recoverable", session.status),
            ));
        }

        match strategy {
            RecoveryStrategy::Resume => {
                self.ledger
                    .update_session_status(session.id, SessionStatus::Running, None)
                    .await?;
                info!(session_id = %session.id, "Session resumed in place");
                Ok(RecoverSessionResponse {
                    session_id: session.id,
                    superseded_session_id: None,
                    message: format!(
                        "session resumed with {} items already processed",
                        session.items_processed
                    ),
                })
            }
            RecoveryStrategy::Restart => {
                // Fresh session copies the work parameters but zeroes the
                // progress; the old session keeps its history.
                let replacement = BillingSession {
                    id: Uuid::new_v4(),
                    workspace_id: session.workspace_id,
                    provider: session.provider.clone(),
                    status: SessionStatus::Running,
                    items_processed: 0,
                    window_start: session.window_start,
                    window_end: session.window_end,
                    last_error: None,
                    superseded_by: None,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                self.ledger.create_session(&replacement).await?;
                self.ledger
                    .update_session_status(
                        session.id,
                        SessionStatus::Superseded,
                        Some(replacement.id),
                    )
                    .await?;
                info!(
                    session_id = %replacement.id,
                    superseded = %session.id,
                    "Session restarted"
                );
                Ok(RecoverSessionResponse {
                    session_id: replacement.id,
                    superseded_session_id: Some(session.id),
                    message: "session restarted from the beginning".to_string(),
                })
            }
        }
    }
}
