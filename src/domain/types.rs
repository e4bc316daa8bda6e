//! Domain types with validation support.

use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Lifecycle status of a subscription.
///
/// `Processing` is the per-billing-period mutual-exclusion lock: a worker
/// that wins the compare-and-set owns the subscription until it records an
/// outcome or the stale-lock crank reclaims it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// Created but not yet activated
    #[default]
    Pending,
    /// Billing normally
    Active,
    /// Last redemption failed; retries remain
    PastDue,
    /// A worker currently owns this subscription's billing period
    Processing,
    /// Paused by the customer or merchant
    Paused,
    /// Canceled; terminal
    Canceled,
    /// Ran to the end of its term; terminal
    Completed,
    /// Retries exhausted or permanent failure; terminal
    PaymentFailed,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Canceled => "canceled",
            Self::Completed => "completed",
            Self::PaymentFailed => "payment_failed",
        }
    }

    /// Terminal states are never left by any automated process.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Completed | Self::PaymentFailed)
    }

    /// States from which a worker may acquire the processing lock.
    #[must_use]
    pub fn is_billable(&self) -> bool {
        matches!(self, Self::Active | Self::PastDue)
    }

    /// Explicit transition table. Anything not listed here is rejected.
    #[must_use]
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (self, next) {
            (Pending, Active) | (Pending, Canceled) => true,
            (Active, Processing) | (Active, Paused) | (Active, Canceled) | (Active, Completed) => {
                true
            }
            (PastDue, Processing) | (PastDue, Canceled) => true,
            (Processing, Active) | (Processing, PastDue) | (Processing, PaymentFailed) => true,
            (Paused, Active) | (Paused, Canceled) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "processing" => Ok(Self::Processing),
            "paused" => Ok(Self::Paused),
            "canceled" => Ok(Self::Canceled),
            "completed" => Ok(Self::Completed),
            "payment_failed" => Ok(Self::PaymentFailed),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Billing cadence of a subscription.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BillingInterval {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BillingInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Advance a period boundary by exactly one interval.
    #[must_use]
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily => from + Duration::days(1),
            Self::Weekly => from + Duration::weeks(1),
            Self::Monthly => from.checked_add_months(Months::new(1)).unwrap_or(from),
            Self::Yearly => from.checked_add_months(Months::new(12)).unwrap_or(from),
        }
    }
}

impl std::str::FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "yearly" => Ok(Self::Yearly),
            _ => Err(format!("Invalid billing interval: {}", s)),
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recurring billing obligation.
///
/// Billing terms (merchant payout address, token, amount, chain) are
/// denormalized onto the subscription so a single ledger read gives a
/// worker everything it needs to build a redemption.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Subscription {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub customer_id: Uuid,
    pub product_id: Uuid,
    pub delegation_id: Uuid,
    /// Merchant payout address (0x-prefixed)
    #[schema(example = "0x7bd3c6a3b5e8f1a2d4c9e0f1a2b3c4d5e6f7a8b9")]
    pub merchant_address: String,
    /// ERC-20 token contract address
    pub token_address: String,
    /// Charge per period in whole token units; scaled by `token_decimals`
    pub token_amount: i64,
    pub token_decimals: i32,
    pub chain_id: i64,
    pub network_name: String,
    pub billing_interval: BillingInterval,
    pub status: SubscriptionStatus,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub next_billing_date: DateTime<Utc>,
    pub retry_count: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    /// Human-readable last failure, shown while the subscription is past due
    pub last_error: Option<String>,
    /// Set when the processing lock is acquired; used for stale-lock reclaim
    pub processing_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An immutable signed spending authorization, referenced by subscriptions.
/// Creation and signing happen upstream; this core only reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Delegation {
    pub id: Uuid,
    /// Serialized signed delegation, as produced by the wallet
    pub data: String,
    pub created_at: DateTime<Utc>,
}

/// Outcome status of a redemption attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Submitted to the executor, outcome not yet recorded
    #[default]
    InFlight,
    /// Confirmed on-chain
    Succeeded,
    /// Failed with a recorded reason
    Failed,
    /// Confirmation timed out after submission; must be reconciled
    Unknown,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_flight" => Ok(Self::InFlight),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid attempt status: {}", s)),
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution of "redeem this delegation for this billing period".
/// Immutable once an outcome is recorded; one row per retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RedemptionAttempt {
    pub id: Uuid,
    pub subscription_id: Option<Uuid>,
    pub delegation_id: Uuid,
    /// Unique key making a logically repeated redemption at-most-once
    pub idempotency_key: String,
    pub merchant_address: String,
    pub token_address: String,
    pub token_amount: i64,
    pub token_decimals: i32,
    pub chain_id: i64,
    pub status: AttemptStatus,
    pub transaction_hash: Option<String>,
    /// Bundler-assigned operation hash; present once submitted
    pub user_op_hash: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Deterministic idempotency key for a (subscription, billing period) pair.
#[must_use]
pub fn billing_idempotency_key(subscription_id: Uuid, period_start: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subscription_id.as_bytes());
    hasher.update(period_start.timestamp().to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

/// Fresh idempotency key for an operator-initiated webhook replay.
#[must_use]
pub fn replay_idempotency_key(original_event_id: &str, at: DateTime<Utc>) -> String {
    format!("{}_replay_{}", original_event_id, at.timestamp())
}

/// Schema-versioned ledger event kinds.
///
/// Tagged so consumers get compile-time coverage of known kinds; anything
/// unrecognized round-trips through `Unknown` instead of being dropped.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    PaymentSucceeded {
        transaction_hash: String,
        token_amount: i64,
        period_start: DateTime<Utc>,
    },
    PaymentRetryScheduled {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        reason: String,
    },
    PaymentPermanentlyFailed {
        reason: String,
    },
    SubscriptionCanceled {
        reason: String,
    },
    #[serde(untagged)]
    Unknown(serde_json::Value),
}

impl EventKind {
    /// Parse a stored payload, falling back to `Unknown` for kinds this
    /// build does not know about.
    #[must_use]
    pub fn from_value(value: serde_json::Value) -> Self {
        match TaggedEventKind::deserialize(&value) {
            Ok(kind) => kind.into(),
            Err(_) => Self::Unknown(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentRetryScheduled { .. } => "payment_retry_scheduled",
            Self::PaymentPermanentlyFailed { .. } => "payment_permanently_failed",
            Self::SubscriptionCanceled { .. } => "subscription_canceled",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// Closed mirror of [`EventKind`] used for strict deserialization; the
/// untagged `Unknown` variant would otherwise swallow every payload.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TaggedEventKind {
    PaymentSucceeded {
        transaction_hash: String,
        token_amount: i64,
        period_start: DateTime<Utc>,
    },
    PaymentRetryScheduled {
        retry_count: i32,
        next_retry_at: DateTime<Utc>,
        reason: String,
    },
    PaymentPermanentlyFailed {
        reason: String,
    },
    SubscriptionCanceled {
        reason: String,
    },
}

impl From<TaggedEventKind> for EventKind {
    fn from(kind: TaggedEventKind) -> Self {
        match kind {
            TaggedEventKind::PaymentSucceeded {
                transaction_hash,
                token_amount,
                period_start,
            } => Self::PaymentSucceeded {
                transaction_hash,
                token_amount,
                period_start,
            },
            TaggedEventKind::PaymentRetryScheduled {
                retry_count,
                next_retry_at,
                reason,
            } => Self::PaymentRetryScheduled {
                retry_count,
                next_retry_at,
                reason,
            },
            TaggedEventKind::PaymentPermanentlyFailed { reason } => {
                Self::PaymentPermanentlyFailed { reason }
            }
            TaggedEventKind::SubscriptionCanceled { reason } => {
                Self::SubscriptionCanceled { reason }
            }
        }
    }
}

pub const LEDGER_EVENT_SCHEMA_VERSION: i32 = 1;

/// Append-only audit record attached to a subscription.
#[derive(Debug, Clone, Serialize, PartialEq, ToSchema)]
pub struct LedgerEvent {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub schema_version: i32,
    pub kind: EventKind,
    pub created_at: DateTime<Utc>,
}

impl LedgerEvent {
    #[must_use]
    pub fn new(subscription_id: Uuid, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            schema_version: LEDGER_EVENT_SCHEMA_VERSION,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// A failed inbound event delivered through the queue-native dead-letter path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct DeadLetterMessage {
    pub id: Uuid,
    pub workspace_id: Uuid,
    /// Upstream provider, e.g. "stripe"
    pub provider: String,
    /// Original event id assigned by the provider
    pub event_id: String,
    pub payload: serde_json::Value,
    pub failure_count: i32,
    pub last_failed_at: DateTime<Utc>,
    pub retry_attempt: i32,
}

/// Per-message verdict of one dead-letter pass.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterDisposition {
    /// Reprocessed successfully (or idempotent duplicate); do not re-queue
    Resolved,
    /// Still waiting on backoff or failed again; transport re-delivers
    Requeue,
    /// Ceiling exceeded or malformed; recorded for operator review
    PermanentlyFailed,
}

/// Aggregate result of one dead-letter batch. A non-zero `requeued` count
/// tells the queue transport to re-deliver.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DeadLetterReport {
    pub total: usize,
    pub resolved: usize,
    pub requeued: usize,
    pub permanently_failed: usize,
}

impl DeadLetterReport {
    #[must_use]
    pub fn has_unresolved(&self) -> bool {
        self.requeued > 0
    }
}

/// An inbound webhook event as persisted by the ingress path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    /// Provider-assigned event id
    pub event_id: String,
    pub payload: serde_json::Value,
    pub failure_count: i32,
    pub replay_count: i32,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Status of a sync/billing session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    /// Replaced by a restarted session
    Superseded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
        }
    }

    /// Only failed or still-running sessions are recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Running | Self::Failed)
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "superseded" => Ok(Self::Superseded),
            _ => Err(format!("Invalid session status: {}", s)),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A long-running sync/billing session recoverable by an operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BillingSession {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub provider: String,
    pub status: SessionStatus,
    /// Progress metadata preserved across a resume
    pub items_processed: i32,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Session that replaced this one, if it was superseded by a restart
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recovery strategy for a stalled session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    /// Re-activate the same session in place, preserving progress
    Resume,
    /// Create a fresh session, mark the old one superseded
    Restart,
}

impl std::str::FromStr for RecoveryStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(Self::Resume),
            "restart" => Ok(Self::Restart),
            _ => Err(format!("Invalid recovery strategy: {}", s)),
        }
    }
}

/// Executor RPC request. Violations of the local bounds are rejected
/// without a network call.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RedeemRequest {
    /// Serialized signed delegation
    #[validate(length(min = 1, message = "Delegation data is required"))]
    pub delegation_data: String,
    #[validate(length(min = 1, message = "Merchant address is required"))]
    #[schema(example = "0x7bd3c6a3b5e8f1a2d4c9e0f1a2b3c4d5e6f7a8b9")]
    pub merchant_address: String,
    #[validate(length(min = 1, message = "Token contract address is required"))]
    pub token_contract_address: String,
    /// Charge amount in whole token units; scaled by `token_decimals`
    #[validate(range(min = 1, message = "Token amount must be greater than 0"))]
    pub token_amount: u64,
    #[validate(range(min = 1, max = 36, message = "Token decimals must be between 1 and 36"))]
    pub token_decimals: u32,
    #[validate(range(min = 1, message = "Chain id must be greater than 0"))]
    #[schema(example = 8453)]
    pub chain_id: u64,
    #[validate(length(min = 1, message = "Network name is required"))]
    #[schema(example = "base")]
    pub network_name: String,
}

/// Executor RPC response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RedeemResponse {
    pub transaction_hash: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
}

impl RedeemResponse {
    #[must_use]
    pub fn ok(transaction_hash: String) -> Self {
        Self {
            transaction_hash: Some(transaction_hash),
            success: true,
            error_message: None,
        }
    }
}

/// Statistics from one discovery/dispatch batch of the redemption processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BillingRunReport {
    pub discovered: usize,
    pub succeeded: usize,
    pub retries_scheduled: usize,
    pub permanently_failed: usize,
    /// Lock not acquired (another worker owns the item)
    pub skipped: usize,
    /// Attempts recovered by post-timeout settlement reconciliation
    pub reconciled: usize,
}

/// Operator request to replay a webhook event.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReplayWebhookRequest {
    pub workspace_id: Uuid,
    #[validate(length(min = 1, message = "Provider is required"))]
    #[schema(example = "stripe")]
    pub provider: String,
    #[validate(length(min = 1, message = "Event id is required"))]
    pub event_id: String,
    /// Bypass the replay-attempt ceiling
    #[serde(default)]
    pub force_replay: bool,
}

/// Outcome of a webhook replay.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplayWebhookResponse {
    pub replay_key: String,
    pub success: bool,
    pub message: String,
}

/// Operator request to recover a session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RecoverSessionRequest {
    /// "resume" or "restart"
    #[validate(length(min = 1, message = "Strategy is required"))]
    #[schema(example = "resume")]
    pub strategy: String,
}

/// Outcome of a session recovery.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecoverSessionResponse {
    /// The session now running (same id for resume, new id for restart)
    pub session_id: Uuid,
    pub superseded_session_id: Option<Uuid>,
    pub message: String,
}

/// Health status enum
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// All systems operational
    Healthy,
    /// Some systems degraded but functional
    Degraded,
    /// Critical systems unavailable
    Unhealthy,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub ledger: HealthStatus,
    pub relay: HealthStatus,
    pub timestamp: DateTime<Utc>,
    #[schema(example = "0.1.0")]
    pub version: String,
}

impl HealthResponse {
    #[must_use]
    pub fn new(ledger: HealthStatus, relay: HealthStatus) -> Self {
        let status = match (&ledger, &relay) {
            (HealthStatus::Healthy, HealthStatus::Healthy) => HealthStatus::Healthy,
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            _ => HealthStatus::Degraded,
        };
        Self {
            status,
            ledger,
            relay,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Error response structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    #[schema(example = "validation_error")]
    pub r#type: String,
    #[schema(example = "Chain id must be greater than 0")]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_subscription_status_display_and_parsing() {
        let statuses = vec![
            (SubscriptionStatus::Pending, "pending"),
            (SubscriptionStatus::Active, "active"),
            (SubscriptionStatus::PastDue, "past_due"),
            (SubscriptionStatus::Processing, "processing"),
            (SubscriptionStatus::Paused, "paused"),
            (SubscriptionStatus::Canceled, "canceled"),
            (SubscriptionStatus::Completed, "completed"),
            (SubscriptionStatus::PaymentFailed, "payment_failed"),
        ];

        for (status, string) in statuses {
            assert_eq!(status.as_str(), string);
            assert_eq!(status.to_string(), string);
            assert_eq!(SubscriptionStatus::from_str(string).unwrap(), status);
        }

        assert!(SubscriptionStatus::from_str("invalid").is_err());
    }

    #[test]
    fn test_terminal_states_have_no_outgoing_transitions() {
        use SubscriptionStatus::*;
        let all = [
            Pending,
            Active,
            PastDue,
            Processing,
            Paused,
            Canceled,
            Completed,
            PaymentFailed,
        ];
        for terminal in [Canceled, Completed, PaymentFailed] {
            assert!(terminal.is_terminal());
            for next in all {
                assert!(
                    !terminal.can_transition_to(next),
                    "{terminal} -> {next} must be rejected"
                );
            }
        }
    }

    #[test]
    fn test_processing_lock_transitions() {
        use SubscriptionStatus::*;
        assert!(Active.can_transition_to(Processing));
        assert!(PastDue.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Active));
        assert!(Processing.can_transition_to(PastDue));
        assert!(Processing.can_transition_to(PaymentFailed));
        assert!(!Paused.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_billing_interval_advance() {
        let start = DateTime::parse_from_rfc3339("2026-01-31T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            BillingInterval::Daily.advance(start),
            start + Duration::days(1)
        );
        assert_eq!(
            BillingInterval::Weekly.advance(start),
            start + Duration::weeks(1)
        );
        // Month-end clamping: Jan 31 -> Feb 28
        let next = BillingInterval::Monthly.advance(start);
        assert_eq!(next.to_rfc3339(), "2026-02-28T00:00:00+00:00");
    }

    #[test]
    fn test_billing_idempotency_key_deterministic_and_period_scoped() {
        let sub = Uuid::new_v4();
        let period_a = Utc::now();
        let period_b = BillingInterval::Monthly.advance(period_a);

        let key1 = billing_idempotency_key(sub, period_a);
        let key2 = billing_idempotency_key(sub, period_a);
        let key3 = billing_idempotency_key(sub, period_b);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
        assert_ne!(key1, billing_idempotency_key(Uuid::new_v4(), period_a));
    }

    #[test]
    fn test_replay_idempotency_key_format() {
        let at = Utc::now();
        let key = replay_idempotency_key("evt_123", at);
        assert!(key.starts_with("evt_123_replay_"));
        assert!(key.ends_with(&at.timestamp().to_string()));
    }

    #[test]
    fn test_event_kind_roundtrip_and_unknown_fallback() {
        let kind = EventKind::PaymentSucceeded {
            transaction_hash: "0xabc".to_string(),
            token_amount: 5_000_000,
            period_start: Utc::now(),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "payment_succeeded");
        assert_eq!(EventKind::from_value(value.clone()), kind);

        let foreign = serde_json::json!({"type": "refund_issued", "amount": 3});
        match EventKind::from_value(foreign.clone()) {
            EventKind::Unknown(v) => assert_eq!(v, foreign),
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_redeem_request_local_validation() {
        let valid = RedeemRequest {
            delegation_data: "{}".to_string(),
            merchant_address: "0xmerchant".to_string(),
            token_contract_address: "0xtoken".to_string(),
            token_amount: 10,
            token_decimals: 6,
            chain_id: 8453,
            network_name: "base".to_string(),
        };
        assert!(valid.validate().is_ok());

        let mut zero_amount = valid.clone();
        zero_amount.token_amount = 0;
        assert!(zero_amount.validate().is_err());

        let mut zero_chain = valid.clone();
        zero_chain.chain_id = 0;
        assert!(zero_chain.validate().is_err());

        let mut empty_network = valid.clone();
        empty_network.network_name = String::new();
        assert!(empty_network.validate().is_err());

        let mut zero_decimals = valid;
        zero_decimals.token_decimals = 0;
        assert!(zero_decimals.validate().is_err());
    }

    #[test]
    fn test_recovery_strategy_parsing() {
        assert_eq!(
            RecoveryStrategy::from_str("resume").unwrap(),
            RecoveryStrategy::Resume
        );
        assert_eq!(
            RecoveryStrategy::from_str("restart").unwrap(),
            RecoveryStrategy::Restart
        );
        assert!(RecoveryStrategy::from_str("rewind").is_err());
    }

    #[test]
    fn test_session_status_recoverability() {
        assert!(SessionStatus::Running.is_recoverable());
        assert!(SessionStatus::Failed.is_recoverable());
        assert!(!SessionStatus::Completed.is_recoverable());
        assert!(!SessionStatus::Superseded.is_recoverable());
    }
}
