//! Mock implementations for testing.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AppError, AttemptOutcome, AttemptStatus, BillingInterval, BillingSession,
    DeadLetterDisposition, DeadLetterMessage, Delegation, LedgerEvent, LedgerStore,
    OperatorAlerter, RedeemRequest, RedemptionAttempt, RedemptionExecutor, SessionStatus,
    Subscription, SubscriptionStatus, WebhookEvent, WebhookIngestor,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }
}

/// Recorded disposition of a dead-letter message.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDisposition {
    pub disposition: DeadLetterDisposition,
    pub error: Option<String>,
}

/// In-memory ledger with real compare-and-set and idempotency semantics,
/// so concurrency tests exercise the same guarantees as the SQL backend.
pub struct MockLedger {
    subscriptions: Mutex<HashMap<Uuid, Subscription>>,
    delegations: Mutex<HashMap<Uuid, Delegation>>,
    attempts: Mutex<Vec<RedemptionAttempt>>,
    events: Mutex<Vec<LedgerEvent>>,
    dead_letters: Mutex<Vec<DeadLetterMessage>>,
    dispositions: Mutex<HashMap<Uuid, RecordedDisposition>>,
    webhook_events: Mutex<Vec<WebhookEvent>>,
    replay_attempts: Mutex<Vec<(String, bool, Option<String>)>>,
    processed_events: Mutex<HashSet<(Uuid, String, String)>>,
    sessions: Mutex<HashMap<Uuid, BillingSession>>,
    config: MockConfig,
    is_healthy: AtomicBool,
}

impl MockLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            subscriptions: Mutex::new(HashMap::new()),
            delegations: Mutex::new(HashMap::new()),
            attempts: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            dead_letters: Mutex::new(Vec::new()),
            dispositions: Mutex::new(HashMap::new()),
            webhook_events: Mutex::new(Vec::new()),
            replay_attempts: Mutex::new(Vec::new()),
            processed_events: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            config,
            is_healthy: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.id, subscription);
    }

    pub fn insert_delegation(&self, delegation: Delegation) {
        self.delegations
            .lock()
            .unwrap()
            .insert(delegation.id, delegation);
    }

    pub fn insert_dead_letter(&self, message: DeadLetterMessage) {
        self.dead_letters.lock().unwrap().push(message);
    }

    pub fn insert_webhook_event(&self, event: WebhookEvent) {
        self.webhook_events.lock().unwrap().push(event);
    }

    pub fn insert_session(&self, session: BillingSession) {
        self.sessions.lock().unwrap().insert(session.id, session);
    }

    pub fn mark_event_processed(&self, workspace_id: Uuid, provider: &str, event_id: &str) {
        self.processed_events.lock().unwrap().insert((
            workspace_id,
            provider.to_string(),
            event_id.to_string(),
        ));
    }

    pub fn subscription(&self, id: Uuid) -> Option<Subscription> {
        self.subscriptions.lock().unwrap().get(&id).cloned()
    }

    pub fn attempts(&self) -> Vec<RedemptionAttempt> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetterMessage> {
        self.dead_letters.lock().unwrap().clone()
    }

    pub fn disposition(&self, message_id: Uuid) -> Option<RecordedDisposition> {
        self.dispositions.lock().unwrap().get(&message_id).cloned()
    }

    pub fn replay_attempts(&self) -> Vec<(String, bool, Option<String>)> {
        self.replay_attempts.lock().unwrap().clone()
    }

    pub fn session(&self, id: Uuid) -> Option<BillingSession> {
        self.sessions.lock().unwrap().get(&id).cloned()
    }

    fn check_should_fail(&self) -> Result<(), AppError> {
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string());
            return Err(AppError::Database(crate::domain::DatabaseError::Query(msg)));
        }
        Ok(())
    }
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MockLedger {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Database(
                crate::domain::DatabaseError::Connection("Unhealthy".to_string()),
            ));
        }
        self.check_should_fail()
    }

    async fn list_due_subscriptions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Subscription>, AppError> {
        self.check_should_fail()?;
        let subscriptions = self.subscriptions.lock().unwrap();
        let mut due: Vec<Subscription> = subscriptions
            .values()
            .filter(|s| match s.status {
                SubscriptionStatus::Active => s.next_billing_date <= now,
                SubscriptionStatus::PastDue => {
                    s.next_retry_at.is_some_and(|at| at <= now)
                }
                _ => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|s| s.next_retry_at.unwrap_or(s.next_billing_date));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        self.check_should_fail()?;
        Ok(self.subscriptions.lock().unwrap().get(&id).cloned())
    }

    async fn begin_processing(&self, id: Uuid) -> Result<Option<Subscription>, AppError> {
        self.check_should_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let Some(subscription) = subscriptions.get_mut(&id) else {
            return Ok(None);
        };
        if !subscription.status.is_billable() {
            return Ok(None);
        }
        subscription.status = SubscriptionStatus::Processing;
        subscription.processing_started_at = Some(Utc::now());
        subscription.updated_at = Utc::now();
        Ok(Some(subscription.clone()))
    }

    async fn finish_billing_cycle(
        &self,
        id: Uuid,
        next_period_start: DateTime<Utc>,
        next_period_end: DateTime<Utc>,
        next_billing_date: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions.get_mut(&id).ok_or_else(|| {
            AppError::Database(crate::domain::DatabaseError::NotFound(id.to_string()))
        })?;
        subscription.status = SubscriptionStatus::Active;
        subscription.current_period_start = next_period_start;
        subscription.current_period_end = next_period_end;
        subscription.next_billing_date = next_billing_date;
        subscription.retry_count = 0;
        subscription.next_retry_at = None;
        subscription.last_error = None;
        subscription.processing_started_at = None;
        subscription.updated_at = Utc::now();
        Ok(())
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions.get_mut(&id).ok_or_else(|| {
            AppError::Database(crate::domain::DatabaseError::NotFound(id.to_string()))
        })?;
        subscription.status = SubscriptionStatus::PastDue;
        subscription.retry_count = retry_count;
        subscription.next_retry_at = Some(next_retry_at);
        subscription.last_error = Some(last_error.to_string());
        subscription.processing_started_at = None;
        subscription.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_permanently_failed(&self, id: Uuid, last_error: &str) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions.get_mut(&id).ok_or_else(|| {
            AppError::Database(crate::domain::DatabaseError::NotFound(id.to_string()))
        })?;
        subscription.status = SubscriptionStatus::PaymentFailed;
        subscription.next_retry_at = None;
        subscription.last_error = Some(last_error.to_string());
        subscription.processing_started_at = None;
        subscription.updated_at = Utc::now();
        Ok(())
    }

    async fn reclaim_stale_processing(
        &self,
        stale_before: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        self.check_should_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let mut reclaimed = 0;
        for subscription in subscriptions.values_mut() {
            if subscription.status == SubscriptionStatus::Processing
                && subscription
                    .processing_started_at
                    .is_some_and(|at| at < stale_before)
            {
                subscription.status = SubscriptionStatus::PastDue;
                subscription.processing_started_at = None;
                // Reclaimed rows must be rediscoverable immediately; a row
                // that was 'active' at lock time has no retry schedule yet.
                subscription.next_retry_at =
                    subscription.next_retry_at.or_else(|| Some(Utc::now()));
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    async fn get_delegation(&self, id: Uuid) -> Result<Option<Delegation>, AppError> {
        self.check_should_fail()?;
        Ok(self.delegations.lock().unwrap().get(&id).cloned())
    }

    async fn record_attempt(&self, attempt: &RedemptionAttempt) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut attempts = self.attempts.lock().unwrap();
        // Same uniqueness rule as the SQL partial index: at most one
        // non-failed attempt per idempotency key.
        let duplicate = attempts.iter().any(|a| {
            a.idempotency_key == attempt.idempotency_key && a.status != AttemptStatus::Failed
        });
        if duplicate {
            return Err(AppError::Database(crate::domain::DatabaseError::Duplicate(
                attempt.idempotency_key.clone(),
            )));
        }
        attempts.push(attempt.clone());
        Ok(())
    }

    async fn record_attempt_outcome(
        &self,
        attempt_id: Uuid,
        outcome: &AttemptOutcome,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut attempts = self.attempts.lock().unwrap();
        let attempt = attempts
            .iter_mut()
            .find(|a| a.id == attempt_id)
            .ok_or_else(|| {
                AppError::Database(crate::domain::DatabaseError::NotFound(
                    attempt_id.to_string(),
                ))
            })?;
        match outcome {
            AttemptOutcome::Succeeded { transaction_hash } => {
                attempt.status = AttemptStatus::Succeeded;
                attempt.transaction_hash = Some(transaction_hash.clone());
            }
            AttemptOutcome::Failed { error_message } => {
                attempt.status = AttemptStatus::Failed;
                attempt.error_message = Some(error_message.clone());
            }
            AttemptOutcome::Unknown { user_op_hash } => {
                attempt.status = AttemptStatus::Unknown;
                attempt.user_op_hash = Some(user_op_hash.clone());
            }
        }
        attempt.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn find_attempt(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<RedemptionAttempt>, AppError> {
        self.check_should_fail()?;
        let attempts = self.attempts.lock().unwrap();
        Ok(attempts
            .iter()
            .filter(|a| a.idempotency_key == idempotency_key)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn append_event(&self, event: &LedgerEvent) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }

    async fn list_events(&self, subscription_id: Uuid) -> Result<Vec<LedgerEvent>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.subscription_id == subscription_id)
            .cloned()
            .collect())
    }

    async fn enqueue_dead_letter(&self, message: &DeadLetterMessage) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.dead_letters.lock().unwrap().push(message.clone());
        Ok(())
    }

    async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetterMessage>, AppError> {
        self.check_should_fail()?;
        let dispositions = self.dispositions.lock().unwrap();
        let mut pending: Vec<DeadLetterMessage> = self
            .dead_letters
            .lock()
            .unwrap()
            .iter()
            .filter(|m| {
                !dispositions
                    .get(&m.id)
                    .is_some_and(|d| d.disposition != DeadLetterDisposition::Requeue)
            })
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.last_failed_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn record_dead_letter_outcome(
        &self,
        message_id: Uuid,
        disposition: DeadLetterDisposition,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        if disposition == DeadLetterDisposition::Requeue {
            let mut messages = self.dead_letters.lock().unwrap();
            if let Some(message) = messages.iter_mut().find(|m| m.id == message_id) {
                message.retry_attempt += 1;
                message.last_failed_at = Utc::now();
            }
        }
        self.dispositions.lock().unwrap().insert(
            message_id,
            RecordedDisposition {
                disposition,
                error: error.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn get_webhook_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, AppError> {
        self.check_should_fail()?;
        Ok(self
            .webhook_events
            .lock()
            .unwrap()
            .iter()
            .find(|e| {
                e.workspace_id == workspace_id && e.provider == provider && e.event_id == event_id
            })
            .cloned())
    }

    async fn record_replay_attempt(
        &self,
        original: &WebhookEvent,
        replay_key: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.replay_attempts.lock().unwrap().push((
            replay_key.to_string(),
            success,
            error.map(str::to_string),
        ));
        let mut events = self.webhook_events.lock().unwrap();
        if let Some(event) = events.iter_mut().find(|e| e.id == original.id) {
            event.replay_count += 1;
        }
        Ok(())
    }

    async fn entity_exists_for_event(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
    ) -> Result<bool, AppError> {
        self.check_should_fail()?;
        Ok(self.processed_events.lock().unwrap().contains(&(
            workspace_id,
            provider.to_string(),
            event_id.to_string(),
        )))
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<BillingSession>, AppError> {
        self.check_should_fail()?;
        Ok(self.sessions.lock().unwrap().get(&id).cloned())
    }

    async fn update_session_status(
        &self,
        id: Uuid,
        status: SessionStatus,
        superseded_by: Option<Uuid>,
    ) -> Result<(), AppError> {
        self.check_should_fail()?;
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(&id).ok_or_else(|| {
            AppError::Database(crate::domain::DatabaseError::NotFound(id.to_string()))
        })?;
        session.status = status;
        if superseded_by.is_some() {
            session.superseded_by = superseded_by;
        }
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn create_session(&self, session: &BillingSession) -> Result<(), AppError> {
        self.check_should_fail()?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id, session.clone());
        Ok(())
    }
}

/// Scriptable executor: push outcomes to control successive `redeem` calls.
/// With no scripted outcomes every call succeeds with a fixed hash.
pub struct MockExecutor {
    outcomes: Mutex<VecDeque<Result<String, AppError>>>,
    settlements: Mutex<HashMap<String, Option<String>>>,
    redeem_calls: Mutex<Vec<RedeemRequest>>,
    confirm_calls: Mutex<Vec<String>>,
    is_healthy: AtomicBool,
}

impl MockExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            settlements: Mutex::new(HashMap::new()),
            redeem_calls: Mutex::new(Vec::new()),
            confirm_calls: Mutex::new(Vec::new()),
            is_healthy: AtomicBool::new(true),
        }
    }

    pub fn push_outcome(&self, outcome: Result<String, AppError>) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Script the settlement answer for a user operation hash.
    pub fn set_settlement(&self, user_op_hash: &str, transaction_hash: Option<String>) {
        self.settlements
            .lock()
            .unwrap()
            .insert(user_op_hash.to_string(), transaction_hash);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.is_healthy.store(healthy, Ordering::Relaxed);
    }

    pub fn redeem_calls(&self) -> Vec<RedeemRequest> {
        self.redeem_calls.lock().unwrap().clone()
    }

    pub fn confirm_calls(&self) -> Vec<String> {
        self.confirm_calls.lock().unwrap().clone()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RedemptionExecutor for MockExecutor {
    async fn health_check(&self) -> Result<(), AppError> {
        if !self.is_healthy.load(Ordering::Relaxed) {
            return Err(AppError::Redemption(
                crate::domain::RedemptionError::RelayUnavailable("Unhealthy".to_string()),
            ));
        }
        Ok(())
    }

    async fn redeem(&self, request: &RedeemRequest) -> Result<String, AppError> {
        self.redeem_calls.lock().unwrap().push(request.clone());
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("0xmock_tx".to_string()))
    }

    async fn confirm_settlement(
        &self,
        user_op_hash: &str,
        _chain_id: u64,
        _network_name: &str,
    ) -> Result<Option<String>, AppError> {
        self.confirm_calls
            .lock()
            .unwrap()
            .push(user_op_hash.to_string());
        Ok(self
            .settlements
            .lock()
            .unwrap()
            .get(user_op_hash)
            .cloned()
            .flatten())
    }
}

/// Scriptable ingestor recording every re-ingestion call.
pub struct MockIngestor {
    provider: String,
    config: MockConfig,
    calls: Mutex<Vec<(Uuid, String, String)>>,
}

impl MockIngestor {
    #[must_use]
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            config: MockConfig::success(),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn failing(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            config: MockConfig::failure(message),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Uuid, String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookIngestor for MockIngestor {
    fn handles_provider(&self, provider: &str) -> bool {
        self.provider.eq_ignore_ascii_case(provider)
    }

    async fn ingest(
        &self,
        workspace_id: Uuid,
        provider: &str,
        event_id: &str,
        _payload: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((workspace_id, provider.to_string(), event_id.to_string()));
        if self.config.should_fail {
            let msg = self
                .config
                .error_message
                .clone()
                .unwrap_or_else(|| "Mock ingest error".to_string());
            return Err(AppError::ExternalService(
                crate::domain::ExternalServiceError::InvalidResponse(msg),
            ));
        }
        Ok(())
    }
}

/// Alerter that records every page instead of delivering it.
#[derive(Default)]
pub struct RecordingAlerter {
    alerts: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl OperatorAlerter for RecordingAlerter {
    async fn system_alert(&self, context: &str, error: &AppError) {
        self.alerts
            .lock()
            .unwrap()
            .push((context.to_string(), error.to_string()));
    }
}

/// A subscription due for billing now, with its delegation.
#[must_use]
pub fn due_subscription(delegation_id: Uuid) -> Subscription {
    let now = Utc::now();
    Subscription {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        customer_id: Uuid::new_v4(),
        product_id: Uuid::new_v4(),
        delegation_id,
        merchant_address: "0x7bd3c6a3b5e8f1a2d4c9e0f1a2b3c4d5e6f7a8b9".to_string(),
        token_address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
        token_amount: 25,
        token_decimals: 6,
        chain_id: 8453,
        network_name: "base".to_string(),
        billing_interval: BillingInterval::Monthly,
        status: SubscriptionStatus::Active,
        current_period_start: now - Duration::days(30),
        current_period_end: now,
        next_billing_date: now - Duration::minutes(1),
        retry_count: 0,
        next_retry_at: None,
        last_error: None,
        processing_started_at: None,
        created_at: now - Duration::days(60),
        updated_at: now - Duration::days(1),
    }
}

/// A well-formed delegation payload accepted by the parser.
#[must_use]
pub fn valid_delegation() -> Delegation {
    valid_delegation_for("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
}

/// A well-formed delegation granted to a specific redeemer address.
#[must_use]
pub fn valid_delegation_for(delegate: &str) -> Delegation {
    let data = serde_json::json!({
        "delegator": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
        "delegate": delegate,
        "signature": format!("0x{}", "ab".repeat(65)),
        "expiry": (Utc::now() + Duration::days(365)).timestamp(),
        "allowance": 1_000_000u64,
    });
    Delegation {
        id: Uuid::new_v4(),
        data: data.to_string(),
        created_at: Utc::now(),
    }
}
