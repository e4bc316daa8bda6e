//! Domain traits defining contracts for external systems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::error::AppError;
use super::types::{
    BillingSession, DeadLetterDisposition, DeadLetterMessage, Delegation, LedgerEvent,
    RedeemRequest, RedemptionAttempt, SessionStatus, Subscription, WebhookEvent,
};

/// Persisted outcome to stamp onto a redemption attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded { transaction_hash: String },
    Failed { error_message: String },
    Unknown { user_op_hash: String },
}

/// Ledger contract: the single source of truth and of mutual exclusion.
///
/// Workers share no in-memory state; they communicate only through these
/// operations, which every backend must implement atomically.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Check ledger connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Subscriptions with `status IN (active, past_due)` whose
    /// `next_billing_date <= now` (or `next_retry_at <= now`), oldest due
    /// first.
    async fn list_due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscription>, AppError>;

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError>;

    /// Compare-and-set the subscription to `processing` iff it is currently
    /// billable and not already locked. Returns the locked row on success,
    /// `None` when another worker owns the item (not an error).
    async fn begin_processing(&self, id: Uuid) -> Result<Option<Subscription>, AppError>;

    /// Success path: advance the billing period, reset retry bookkeeping,
    /// release the lock back to `active`.
    async fn finish_billing_cycle(
        &self,
        id: Uuid,
        next_period_start: DateTime<Utc>,
        next_period_end: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError>;

    /// Temporary-failure path: bump `retry_count`, set `next_retry_at`,
    /// release the lock to `past_due` with a human-readable reason.
    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), AppError>;

    /// Permanent-failure path: terminal `payment_failed`, no further
    /// automatic retries.
    async fn mark_permanently_failed(&self, id: Uuid, last_error: &str) -> Result<(), AppError>;

    /// Watchdog: reset `processing` rows older than `stale_before` back to
    /// `past_due`. Returns the number of reclaimed rows.
    async fn reclaim_stale_processing(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<u64, AppError>;

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError>;

    /// Create an in-flight attempt row. The unique idempotency key is the
    /// at-most-once guard; a duplicate key surfaces as
    /// `DatabaseError::Duplicate`.
    async fn record_attempt(&self, attempt: &RedemptionAttempt) -> Result<(), AppError>;

    /// Stamp the outcome onto an attempt. Attempts are immutable afterwards.
    async fn record_attempt_outcome(
        &self,
        attempt_id: Uuid,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError>;

    /// Most recent attempt for an idempotency key, if any.
    async fn find_attempt(&self, idempotency_key: &str)
    -> Result<Option<RedemptionAttempt>, AppError>;

    /// Append an audit event; events are never mutated.
    async fn append_event(&self, event: &LedgerEvent) -> Result<(), AppError>;

    async fn list_events(&self, subscription_id: Uuid) -> Result<Vec<LedgerEvent>, AppError>;

    /// Hand a permanently failed subscription to the dead-letter table for
    /// operator review.
    async fn enqueue_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), AppError>;

    /// Pending dead-letter messages, oldest failure first.
    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterMessage>, AppError>;

    /// Record the disposition of a dead-letter message. `Requeue` bumps the
    /// message's reprocessing counter; deferred messages (still inside their
    /// backoff window) are simply not touched.
    async fn record_dead_letter_outcome(
        &self,
        message_id: Uuid,
        disposition: DeadLetterDisposition,
        error: Option<&str>,
    ) -> Result<(), AppError>;

    async fn get_webhook_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, AppError>;

    /// Persist a replay attempt record cloned from the original event.
    /// The original row is never mutated beyond its replay counter.
    async fn record_replay_attempt(
        &self,
        original: &WebhookEvent,
        replay_key: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), AppError>;

    /// Duplicate check for dead-letter reprocessing: does the business
    /// entity this event would create already exist?
    async fn entity_exists_for_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<bool, AppError>;

    async fn get_session(&self, id: Uuid) -> Result<Option<BillingSession>, AppError>;

    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        superseded_by: Option<Uuid>,
    ) -> Result<(), AppError>;

    async fn create_session(&self, session: &BillingSession) -> Result<(), AppError>;
}

/// Blockchain-facing redemption boundary.
///
/// Pure request/response: the executor never touches the ledger, which is
/// what keeps idempotency tractable for its callers.
#[async_trait]
pub trait RedemptionExecutor: Send + Sync {
    /// Check relay connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Redeem a delegation. Returns the confirmed transaction hash.
    async fn redeem(&self, request: &RedeemRequest) -> Result<String, AppError>;

    /// Reconciliation read for unknown outcomes: did a previously submitted
    /// operation land on-chain? Returns the transaction hash if it did.
    async fn confirm_settlement(
        &self,
        user_op_hash: &str,
        chain_id: u64,
        network_name: &str,
    ) -> Result<Option<String>, AppError> {
        let _ = (user_op_hash, chain_id, network_name);
        Err(AppError::NotSupported(
            "confirm_settlement not implemented".to_string(),
        ))
    }
}

/// Provider-specific webhook reprocessing, dispatched by the dead-letter
/// processor and the replay path. Implementations run the same ingestion
/// logic as the normal inbound path.
#[async_trait]
pub trait WebhookIngestor: Send + Sync {
    /// Providers this ingestor handles ("stripe"-style identifiers).
    fn handles_provider(&self, provider: &str) -> bool;

    /// Re-run ingestion for a stored payload.
    async fn ingest(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppError>;
}

/// Operator alerting channel for system-category failures.
#[async_trait]
pub trait OperatorAlerter: Send + Sync {
    async fn system_alert(&self, context: &str, error: &AppError);
}
