//! PostgreSQL ledger implementation.
//!
//! Every mutual-exclusion guarantee lives in this module's SQL: the
//! processing lock is a conditional `UPDATE ... RETURNING`, the at-most-once
//! guard is a unique index on attempt idempotency keys, and state releases
//! are conditioned on the row still holding the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::{
    AppError, AttemptOutcome, AttemptStatus, BillingSession, DatabaseError,
    DeadLetterDisposition, DeadLetterMessage, Delegation, EventKind, LedgerEvent, LedgerStore,
    RedemptionAttempt, SessionStatus, Subscription, WebhookEvent,
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL-backed ledger with connection pooling.
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Connect with custom pool configuration.
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Connect with default pool configuration.
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_subscription(row: &sqlx::postgres::PgRow) -> Result<Subscription, AppError> {
        let status: String = row.get("status");
        let interval: String = row.get("billing_interval");

        Ok(Subscription {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            customer_id: row.get("customer_id"),
            product_id: row.get("product_id"),
            delegation_id: row.get("delegation_id"),
            merchant_address: row.get("merchant_address"),
            token_address: row.get("token_address"),
            token_amount: row.get("token_amount"),
            token_decimals: row.get("token_decimals"),
            chain_id: row.get("chain_id"),
            network_name: row.get("network_name"),
            billing_interval: interval
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            status: status
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            current_period_start: row.get("current_period_start"),
            current_period_end: row.get("current_period_end"),
            next_billing_date: row.get("next_billing_date"),
            retry_count: row.get("retry_count"),
            next_retry_at: row.get("next_retry_at"),
            last_error: row.get("last_error"),
            processing_started_at: row.get("processing_started_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_attempt(row: &sqlx::postgres::PgRow) -> Result<RedemptionAttempt, AppError> {
        let status: String = row.get("status");
        Ok(RedemptionAttempt {
            id: row.get("id"),
            subscription_id: row.get("subscription_id"),
            delegation_id: row.get("delegation_id"),
            idempotency_key: row.get("idempotency_key"),
            merchant_address: row.get("merchant_address"),
            token_address: row.get("token_address"),
            token_amount: row.get("token_amount"),
            token_decimals: row.get("token_decimals"),
            chain_id: row.get("chain_id"),
            status: status
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            transaction_hash: row.get("transaction_hash"),
            user_op_hash: row.get("user_op_hash"),
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }

    fn row_to_dead_letter(row: &sqlx::postgres::PgRow) -> DeadLetterMessage {
        DeadLetterMessage {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            provider: row.get("provider"),
            event_id: row.get("event_id"),
            payload: row.get("payload"),
            failure_count: row.get("failure_count"),
            last_failed_at: row.get("last_failed_at"),
            retry_attempt: row.get("retry_attempt"),
        }
    }

    fn row_to_webhook_event(row: &sqlx::postgres::PgRow) -> WebhookEvent {
        WebhookEvent {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            provider: row.get("provider"),
            event_id: row.get("event_id"),
            payload: row.get("payload"),
            failure_count: row.get("failure_count"),
            replay_count: row.get("replay_count"),
            last_failed_at: row.get("last_failed_at"),
            created_at: row.get("created_at"),
        }
    }

    fn row_to_session(row: &sqlx::postgres::PgRow) -> Result<BillingSession, AppError> {
        let status: String = row.get("status");
        Ok(BillingSession {
            id: row.get("id"),
            workspace_id: row.get("workspace_id"),
            provider: row.get("provider"),
            status: status
                .parse()
                .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))?,
            items_processed: row.get("items_processed"),
            window_start: row.get("window_start"),
            window_end: row.get("window_end"),
            last_error: row.get("last_error"),
            superseded_by: row.get("superseded_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, workspace_id, customer_id, product_id, delegation_id, \
     merchant_address, token_address, token_amount, token_decimals, chain_id, network_name, \
     billing_interval, status, current_period_start, current_period_end, next_billing_date, \
     retry_count, next_retry_at, last_error, processing_started_at, created_at, updated_at";

#[async_trait]
impl LedgerStore for PostgresLedger {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscription>, AppError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SUBSCRIPTION_COLUMNS}
            FROM subscriptions
            WHERE (status = 'active' AND next_billing_date <= $1)
               OR (status = 'past_due' AND next_retry_at IS NOT NULL AND next_retry_at <= $1)
            ORDER BY COALESCE(next_retry_at, next_billing_date) ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        rows.iter().map(Self::row_to_subscription).collect()
    }

    #[instrument(skip(self))]
    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_subscription).transpose()
    }

    /// The lock acquisition. The status predicate makes this a
    /// compare-and-set: exactly one concurrent caller observes a billable
    /// status and flips it to `processing`.
    #[instrument(skip(self))]
    async fn begin_processing(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'processing', processing_started_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status IN ('active', 'past_due')
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_subscription).transpose()
    }

    #[instrument(skip(self))]
    async fn finish_billing_cycle(
        &self,
        id: Uuid,
        next_period_start: DateTime<Utc>,
        next_period_end: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                current_period_start = $2,
                current_period_end = $3,
                next_billing_date = $4,
                retry_count = 0,
                next_retry_at = NULL,
                last_error = NULL,
                processing_started_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(next_period_start)
        .bind(next_period_end)
        .bind(next_billing_date)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "subscription {id} not in processing state"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, last_error))]
    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due',
                retry_count = $2,
                next_retry_at = $3,
                last_error = $4,
                processing_started_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(retry_count)
        .bind(next_retry_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "subscription {id} not in processing state"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, last_error))]
    async fn mark_permanently_failed(&self, id: Uuid, last_error: &str) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'payment_failed',
                next_retry_at = NULL,
                last_error = $2,
                processing_started_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "subscription {id} not in processing state"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn reclaim_stale_processing(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = 'past_due',
                next_retry_at = COALESCE(next_retry_at, NOW()),
                processing_started_at = NULL,
                updated_at = NOW()
            WHERE status = 'processing' AND processing_started_at < $1
            "#,
        )
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError> {
        let row = sqlx::query("SELECT id, data, created_at FROM delegations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        Ok(row.map(|row| Delegation {
            id: row.get("id"),
            data: row.get("data"),
            created_at: row.get("created_at"),
        }))
    }

    #[instrument(skip(self, attempt), fields(idempotency_key = %attempt.idempotency_key))]
    async fn record_attempt(&self, attempt: &RedemptionAttempt) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO redemption_attempts (
                id, subscription_id, delegation_id, idempotency_key, merchant_address,
                token_address, token_amount, token_decimals, chain_id, status,
                transaction_hash, user_op_hash, error_message, created_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.subscription_id)
        .bind(attempt.delegation_id)
        .bind(&attempt.idempotency_key)
        .bind(&attempt.merchant_address)
        .bind(&attempt.token_address)
        .bind(attempt.token_amount)
        .bind(attempt.token_decimals)
        .bind(attempt.chain_id)
        .bind(attempt.status.as_str())
        .bind(&attempt.transaction_hash)
        .bind(&attempt.user_op_hash)
        .bind(&attempt.error_message)
        .bind(attempt.created_at)
        .bind(attempt.completed_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self, outcome))]
    async fn record_attempt_outcome(
        &self,
        attempt_id: Uuid,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError> {
        let (status, transaction_hash, user_op_hash, error_message) = match outcome {
            AttemptOutcome::Succeeded { transaction_hash } => (
                AttemptStatus::Succeeded,
                Some(transaction_hash.as_str()),
                None,
                None,
            ),
            AttemptOutcome::Failed { error_message } => (
                AttemptStatus::Failed,
                None,
                None,
                Some(error_message.as_str()),
            ),
            AttemptOutcome::Unknown { user_op_hash } => (
                AttemptStatus::Unknown,
                None,
                Some(user_op_hash.as_str()),
                None,
            ),
        };

        let result = sqlx::query(
            r#"
            UPDATE redemption_attempts
            SET status = $2,
                transaction_hash = COALESCE($3, transaction_hash),
                user_op_hash = COALESCE($4, user_op_hash),
                error_message = COALESCE($5, error_message),
                completed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(status.as_str())
        .bind(transaction_hash)
        .bind(user_op_hash)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "attempt {attempt_id} not found"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn find_attempt(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<RedemptionAttempt>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, subscription_id, delegation_id, idempotency_key, merchant_address,
                   token_address, token_amount, token_decimals, chain_id, status,
                   transaction_hash, user_op_hash, error_message, created_at, completed_at
            FROM redemption_attempts
            WHERE idempotency_key = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_attempt).transpose()
    }

    #[instrument(skip(self, event))]
    async fn append_event(&self, event: &LedgerEvent) -> Result<(), AppError> {
        let kind = serde_json::to_value(&event.kind)?;
        sqlx::query(
            r#"
            INSERT INTO ledger_events (id, subscription_id, schema_version, kind, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.id)
        .bind(event.subscription_id)
        .bind(event.schema_version)
        .bind(kind)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_events(&self, subscription_id: Uuid) -> Result<Vec<LedgerEvent>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, subscription_id, schema_version, kind, created_at
            FROM ledger_events
            WHERE subscription_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(subscription_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows
            .into_iter()
            .map(|row| LedgerEvent {
                id: row.get("id"),
                subscription_id: row.get("subscription_id"),
                schema_version: row.get("schema_version"),
                kind: EventKind::from_value(row.get::<serde_json::Value, _>("kind")),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    #[instrument(skip(self, message), fields(event_id = %message.event_id))]
    async fn enqueue_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO dead_letter_messages (
                id, workspace_id, provider, event_id, payload,
                failure_count, last_failed_at, retry_attempt, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending')
            "#,
        )
        .bind(message.id)
        .bind(message.workspace_id)
        .bind(&message.provider)
        .bind(&message.event_id)
        .bind(&message.payload)
        .bind(message.failure_count)
        .bind(message.last_failed_at)
        .bind(message.retry_attempt)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterMessage>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, workspace_id, provider, event_id, payload,
                   failure_count, last_failed_at, retry_attempt
            FROM dead_letter_messages
            WHERE status = 'pending'
            ORDER BY last_failed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(rows.iter().map(Self::row_to_dead_letter).collect())
    }

    #[instrument(skip(self, error))]
    async fn record_dead_letter_outcome(
        &self,
        message_id: Uuid,
        disposition: DeadLetterDisposition,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        let query = match disposition {
            DeadLetterDisposition::Resolved => sqlx::query(
                r#"
                UPDATE dead_letter_messages
                SET status = 'resolved', resolved_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(message_id),
            DeadLetterDisposition::Requeue => sqlx::query(
                r#"
                UPDATE dead_letter_messages
                SET retry_attempt = retry_attempt + 1,
                    last_failed_at = NOW(),
                    last_reprocess_error = $2
                WHERE id = $1
                "#,
            )
            .bind(message_id)
            .bind(error),
            DeadLetterDisposition::PermanentlyFailed => sqlx::query(
                r#"
                UPDATE dead_letter_messages
                SET status = 'failed', last_reprocess_error = $2
                WHERE id = $1
                "#,
            )
            .bind(message_id)
            .bind(error),
        };

        let result = query.execute(&self.pool).await.map_err(DatabaseError::from)?;
        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "dead-letter message {message_id} not found"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_webhook_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, workspace_id, provider, event_id, payload,
                   failure_count, replay_count, last_failed_at, created_at
            FROM webhook_events
            WHERE workspace_id = $1 AND provider = $2 AND event_id = $3
            "#,
        )
        .bind(workspace_id)
        .bind(provider)
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(row.as_ref().map(Self::row_to_webhook_event))
    }

    /// Replay bookkeeping runs in one transaction: the attempt row and the
    /// counter bump commit together or not at all. The original event is
    /// otherwise untouched.
    #[instrument(skip(self, original, error), fields(event_id = %original.event_id))]
    async fn record_replay_attempt(
        &self,
        original: &WebhookEvent,
        replay_key: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from)?;

        sqlx::query(
            r#"
            INSERT INTO webhook_replay_attempts (id, webhook_event_id, replay_key, success, error, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(original.id)
        .bind(replay_key)
        .bind(success)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(DatabaseError::from)?;

        sqlx::query("UPDATE webhook_events SET replay_count = replay_count + 1 WHERE id = $1")
            .bind(original.id)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;

        tx.commit().await.map_err(DatabaseError::from)?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn entity_exists_for_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM processed_events
                WHERE workspace_id = $1 AND provider = $2 AND event_id = $3
            ) AS exists
            "#,
        )
        .bind(workspace_id)
        .bind(provider)
        .bind(event_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        Ok(row.get("exists"))
    }

    #[instrument(skip(self))]
    async fn get_session(&self, id: Uuid) -> Result<Option<BillingSession>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, workspace_id, provider, status, items_processed,
                   window_start, window_end, last_error, superseded_by, created_at, updated_at
            FROM billing_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    #[instrument(skip(self))]
    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        superseded_by: Option<Uuid>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE billing_sessions
            SET status = $2, superseded_by = COALESCE($3, superseded_by), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(superseded_by)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;

        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(format!(
                "session {id} not found"
            ))));
        }
        Ok(())
    }

    #[instrument(skip(self, session))]
    async fn create_session(&self, session: &BillingSession) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO billing_sessions (
                id, workspace_id, provider, status, items_processed,
                window_start, window_end, last_error, superseded_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(session.id)
        .bind(session.workspace_id)
        .bind(&session.provider)
        .bind(session.status.as_str())
        .bind(session.items_processed)
        .bind(session.window_start)
        .bind(session.window_end)
        .bind(&session.last_error)
        .bind(session.superseded_by)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from)?;
        Ok(())
    }
}
