//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, ConfigError, DatabaseError, ErrorClass, ExternalServiceError, RedemptionError,
    ValidationError,
};
pub use traits::{AttemptOutcome, LedgerStore, OperatorAlerter, RedemptionExecutor, WebhookIngestor};
pub use types::{
    AttemptStatus, BillingInterval, BillingRunReport, BillingSession, DeadLetterDisposition,
    DeadLetterMessage, DeadLetterReport, Delegation, ErrorDetail, ErrorResponse, EventKind,
    HealthResponse, HealthStatus, LedgerEvent, RecoverSessionRequest, RecoverSessionResponse,
    RecoveryStrategy, RedeemRequest, RedeemResponse, RedemptionAttempt, ReplayWebhookRequest,
    ReplayWebhookResponse, SessionStatus, Subscription, SubscriptionStatus, WebhookEvent,
    billing_idempotency_key, replay_idempotency_key,
};
