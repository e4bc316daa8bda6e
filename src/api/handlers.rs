//! HTTP request handlers with OpenAPI documentation.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use utoipa::OpenApi;
use uuid::Uuid;
use validator::Validate;

use crate::app::AppState;
use crate::domain::{
    AppError, BillingRunReport, DatabaseError, DeadLetterReport, ErrorDetail, ErrorResponse,
    ExternalServiceError, HealthResponse, HealthStatus, LedgerEvent, RecoverSessionRequest,
    RecoverSessionResponse, RedeemRequest, RedeemResponse, RedemptionError, ReplayWebhookRequest,
    ReplayWebhookResponse, Subscription, ValidationError,
};

/// OpenAPI documentation structure
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Delegation Billing Engine API",
        version = "0.1.0",
        description = "Recurring billing by redeeming pre-signed spending delegations on-chain",
        license(
            name = "MIT"
        )
    ),
    paths(
        redeem_handler,
        billing_run_handler,
        get_subscription_handler,
        list_subscription_events_handler,
        process_dead_letters_handler,
        replay_webhook_handler,
        recover_session_handler,
        health_check_handler,
        liveness_handler,
        readiness_handler,
    ),
    components(
        schemas(
            RedeemRequest,
            RedeemResponse,
            BillingRunReport,
            Subscription,
            crate::domain::SubscriptionStatus,
            crate::domain::BillingInterval,
            LedgerEvent,
            crate::domain::EventKind,
            DeadLetterReport,
            ReplayWebhookRequest,
            ReplayWebhookResponse,
            RecoverSessionRequest,
            RecoverSessionResponse,
            HealthResponse,
            HealthStatus,
            ErrorResponse,
            ErrorDetail,
        )
    ),
    tags(
        (name = "redemptions", description = "Direct delegation redemption"),
        (name = "billing", description = "Billing cycle management"),
        (name = "subscriptions", description = "Subscription inspection"),
        (name = "recovery", description = "Dead-letter and error recovery operations"),
        (name = "health", description = "Health check endpoints")
    )
)]
pub struct ApiDoc;

/// Redeem a delegation immediately
///
/// Validates the request, builds the user operation, and submits it through
/// the bundler. The call blocks until on-chain confirmation or a
/// classified failure.
#[utoipa::path(
    post,
    path = "/redemptions",
    tag = "redemptions",
    request_body = RedeemRequest,
    responses(
        (status = 200, description = "Delegation redeemed and confirmed on-chain", body = RedeemResponse),
        (status = 400, description = "Validation error - malformed request or delegation", body = ErrorResponse),
        (status = 402, description = "Insufficient balance or allowance", body = ErrorResponse),
        (status = 422, description = "Execution reverted on-chain", body = ErrorResponse),
        (status = 503, description = "Relay unavailable", body = ErrorResponse),
        (status = 504, description = "Confirmation timed out; outcome unknown", body = ErrorResponse)
    )
)]
pub async fn redeem_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RedeemRequest>,
) -> Result<Json<RedeemResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let transaction_hash = state.executor.redeem(&payload).await?;
    Ok(Json(RedeemResponse::ok(transaction_hash)))
}

/// Run one billing cycle now
///
/// Triggers the same discovery/dispatch pass the background worker runs on
/// its interval. Safe to call while the worker is running; the processing
/// lock makes overlapping runs skip each other's items.
#[utoipa::path(
    post,
    path = "/billing/run",
    tag = "billing",
    responses(
        (status = 200, description = "Billing cycle statistics", body = BillingRunReport),
        (status = 503, description = "Ledger unavailable", body = ErrorResponse)
    )
)]
pub async fn billing_run_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<BillingRunReport>, AppError> {
    let report = state.processor.run_billing_cycle().await?;
    Ok(Json(report))
}

/// Get a subscription by ID
#[utoipa::path(
    get,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Subscription found", body = Subscription),
        (status = 404, description = "Subscription not found", body = ErrorResponse)
    )
)]
pub async fn get_subscription_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    let subscription = state
        .ledger
        .get_subscription(id)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("subscription {id}"))))?;
    Ok(Json(subscription))
}

/// List the audit events of a subscription
#[utoipa::path(
    get,
    path = "/subscriptions/{id}/events",
    tag = "subscriptions",
    params(
        ("id" = Uuid, Path, description = "Subscription ID")
    ),
    responses(
        (status = 200, description = "Audit events, oldest first", body = Vec<LedgerEvent>)
    )
)]
pub async fn list_subscription_events_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<LedgerEvent>>, AppError> {
    let events = state.ledger.list_events(id).await?;
    Ok(Json(events))
}

/// Process the pending dead-letter batch
#[utoipa::path(
    post,
    path = "/dlq/process",
    tag = "recovery",
    responses(
        (status = 200, description = "Per-disposition tally of the batch", body = DeadLetterReport),
        (status = 503, description = "Ledger unavailable", body = ErrorResponse)
    )
)]
pub async fn process_dead_letters_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DeadLetterReport>, AppError> {
    let report = state.dead_letter.process_batch().await?;
    Ok(Json(report))
}

/// Replay a stored webhook event
///
/// Re-runs ingestion for a stored payload under a fresh replay key. The
/// replay ceiling rejects repeated replays unless `force_replay` is set.
#[utoipa::path(
    post,
    path = "/recovery/webhooks/replay",
    tag = "recovery",
    request_body = ReplayWebhookRequest,
    responses(
        (status = 200, description = "Replay attempted; see `success`", body = ReplayWebhookResponse),
        (status = 400, description = "Replay ceiling reached (use force_replay) or invalid request", body = ErrorResponse),
        (status = 404, description = "Stored event not found", body = ErrorResponse)
    )
)]
pub async fn replay_webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ReplayWebhookRequest>,
) -> Result<Json<ReplayWebhookResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let response = state.recovery.replay_webhook_event(&payload).await?;
    Ok(Json(response))
}

/// Recover a stalled billing session
#[utoipa::path(
    post,
    path = "/recovery/sessions/{id}",
    tag = "recovery",
    params(
        ("id" = Uuid, Path, description = "Session ID")
    ),
    request_body = RecoverSessionRequest,
    responses(
        (status = 200, description = "Session recovered", body = RecoverSessionResponse),
        (status = 400, description = "Session not recoverable or unknown strategy", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn recover_session_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RecoverSessionRequest>,
) -> Result<Json<RecoverSessionResponse>, AppError> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(ValidationError::Multiple(e.to_string())))?;
    let response = state.recovery.recover_session(id, &payload).await?;
    Ok(Json(response))
}

/// Aggregated health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Health status of the ledger and relay", body = HealthResponse)
    )
)]
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let ledger = match state.ledger.health_check().await {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => {
            error!(error = %e, "Ledger health check failed");
            HealthStatus::Unhealthy
        }
    };
    let relay = match state.executor.health_check().await {
        Ok(()) => HealthStatus::Healthy,
        Err(e) => {
            error!(error = %e, "Relay health check failed");
            HealthStatus::Degraded
        }
    };
    Json(HealthResponse::new(ledger, relay))
}

/// Kubernetes liveness probe
#[utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    responses(
        (status = 200, description = "Application is alive")
    )
)]
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses(
        (status = 200, description = "Application is ready to serve traffic"),
        (status = 503, description = "Application is not ready")
    )
)]
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    match state.ledger.health_check().await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type, message) = match &self {
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error", self.to_string()),
            AppError::Redemption(redemption_err) => match redemption_err {
                RedemptionError::MalformedDelegation(_)
                | RedemptionError::DelegationExpired { .. }
                | RedemptionError::DelegateMismatch { .. }
                | RedemptionError::UnsupportedNetwork { .. } => (
                    StatusCode::BAD_REQUEST,
                    "invalid_delegation",
                    self.to_string(),
                ),
                RedemptionError::InsufficientBalance(_) => (
                    StatusCode::PAYMENT_REQUIRED,
                    "insufficient_balance",
                    self.to_string(),
                ),
                RedemptionError::ExecutionReverted(_) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    "execution_reverted",
                    self.to_string(),
                ),
                RedemptionError::RelayUnavailable(_) | RedemptionError::GasEstimation(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "relay_error",
                    self.to_string(),
                ),
                RedemptionError::ConfirmationTimeout { .. } => (
                    StatusCode::GATEWAY_TIMEOUT,
                    "confirmation_timeout",
                    self.to_string(),
                ),
            },
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "database_error",
                    self.to_string(),
                ),
                DatabaseError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", self.to_string())
                }
                DatabaseError::Duplicate(_) => {
                    (StatusCode::CONFLICT, "duplicate", self.to_string())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    self.to_string(),
                ),
            },
            AppError::ExternalService(ext_err) => match ext_err {
                ExternalServiceError::Timeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "timeout", self.to_string())
                }
                ExternalServiceError::RateLimited(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    self.to_string(),
                ),
                _ => (
                    StatusCode::BAD_GATEWAY,
                    "external_service_error",
                    self.to_string(),
                ),
            },
            AppError::NotSupported(_) => (
                StatusCode::NOT_IMPLEMENTED,
                "not_supported",
                self.to_string(),
            ),
            AppError::Config(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                error!(error = %self, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    self.to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });
        (status, body).into_response()
    }
}
