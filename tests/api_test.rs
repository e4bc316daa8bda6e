//! Integration tests for the API.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;
use uuid::Uuid;

use delegation_billing_engine::api::create_router;
use delegation_billing_engine::app::AppState;
use delegation_billing_engine::domain::{
    AppError, BillingRunReport, BillingSession, DeadLetterMessage, DeadLetterReport,
    ErrorResponse, HealthResponse, HealthStatus, RecoverSessionResponse, RedeemRequest,
    RedeemResponse, RedemptionError, ReplayWebhookResponse, SessionStatus, Subscription,
    WebhookEvent,
};
use delegation_billing_engine::test_utils::{
    MockExecutor, MockIngestor, MockLedger, RecordingAlerter, due_subscription, valid_delegation,
};

struct TestApp {
    ledger: Arc<MockLedger>,
    executor: Arc<MockExecutor>,
    state: Arc<AppState>,
}

fn create_test_app() -> TestApp {
    let ledger = Arc::new(MockLedger::new());
    let executor = Arc::new(MockExecutor::new());
    let alerter = Arc::new(RecordingAlerter::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let state = Arc::new(AppState::new(
        Arc::clone(&ledger) as _,
        Arc::clone(&executor) as _,
        alerter as _,
        vec![ingestor as _],
    ));
    TestApp {
        ledger,
        executor,
        state,
    }
}

fn redeem_payload() -> RedeemRequest {
    RedeemRequest {
        delegation_data: valid_delegation().data,
        merchant_address: "0x7bd3c6a3b5e8f1a2d4c9e0f1a2b3c4d5e6f7a8b9".to_string(),
        token_contract_address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
        token_amount: 25,
        token_decimals: 6,
        chain_id: 8453,
        network_name: "base".to_string(),
    }
}

fn post_json(uri: &str, body: &impl serde::Serialize) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_string(body).unwrap()))
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_of<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_redeem_success() {
    let app = create_test_app();
    let router = create_router(app.state);

    let response = router
        .oneshot(post_json("/redemptions", &redeem_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: RedeemResponse = body_of(response).await;
    assert!(body.success);
    assert_eq!(body.transaction_hash.as_deref(), Some("0xmock_tx"));
    assert_eq!(app.executor.redeem_calls().len(), 1);
}

#[tokio::test]
async fn test_redeem_validation_error() {
    let app = create_test_app();
    let router = create_router(app.state);

    let mut payload = redeem_payload();
    payload.token_amount = 0;

    let response = router
        .oneshot(post_json("/redemptions", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = body_of(response).await;
    assert_eq!(body.error.r#type, "validation_error");
    // Rejected before any network call
    assert!(app.executor.redeem_calls().is_empty());
}

#[tokio::test]
async fn test_redeem_insufficient_balance_is_402() {
    let app = create_test_app();
    app.executor.push_outcome(Err(AppError::Redemption(
        RedemptionError::InsufficientBalance("no funds".to_string()),
    )));
    let router = create_router(app.state);

    let response = router
        .oneshot(post_json("/redemptions", &redeem_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    let body: ErrorResponse = body_of(response).await;
    assert_eq!(body.error.r#type, "insufficient_balance");
}

#[tokio::test]
async fn test_redeem_confirmation_timeout_is_504() {
    let app = create_test_app();
    app.executor.push_outcome(Err(AppError::Redemption(
        RedemptionError::ConfirmationTimeout {
            user_op_hash: "0xop".to_string(),
        },
    )));
    let router = create_router(app.state);

    let response = router
        .oneshot(post_json("/redemptions", &redeem_payload()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_billing_run_reports_batch() {
    let app = create_test_app();
    let delegation = valid_delegation();
    app.ledger.insert_subscription(due_subscription(delegation.id));
    app.ledger.insert_delegation(delegation);
    let router = create_router(app.state);

    let response = router.oneshot(post_empty("/billing/run")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: BillingRunReport = body_of(response).await;
    assert_eq!(report.discovered, 1);
    assert_eq!(report.succeeded, 1);
}

#[tokio::test]
async fn test_get_subscription() {
    let app = create_test_app();
    let delegation = valid_delegation();
    let subscription = due_subscription(delegation.id);
    let id = subscription.id;
    app.ledger.insert_subscription(subscription);
    let router = create_router(app.state);

    let response = router
        .clone()
        .oneshot(get(&format!("/subscriptions/{id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Subscription = body_of(response).await;
    assert_eq!(body.id, id);

    let missing = router
        .oneshot(get(&format!("/subscriptions/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_process_dead_letters() {
    let app = create_test_app();
    app.ledger.insert_dead_letter(DeadLetterMessage {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        event_id: "evt_dl".to_string(),
        payload: serde_json::json!({"type": "invoice.paid"}),
        failure_count: 3,
        last_failed_at: Utc::now() - Duration::hours(1),
        retry_attempt: 0,
    });
    let router = create_router(app.state);

    let response = router.oneshot(post_empty("/dlq/process")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let report: DeadLetterReport = body_of(response).await;
    assert_eq!(report.total, 1);
    assert_eq!(report.resolved, 1);
}

#[tokio::test]
async fn test_replay_webhook() {
    let app = create_test_app();
    let event = WebhookEvent {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        event_id: "evt_replay".to_string(),
        payload: serde_json::json!({"type": "invoice.paid"}),
        failure_count: 1,
        replay_count: 0,
        last_failed_at: None,
        created_at: Utc::now(),
    };
    app.ledger.insert_webhook_event(event.clone());
    let router = create_router(app.state);

    let payload = serde_json::json!({
        "workspace_id": event.workspace_id,
        "provider": "stripe",
        "event_id": "evt_replay",
    });
    let response = router
        .oneshot(post_json("/recovery/webhooks/replay", &payload))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: ReplayWebhookResponse = body_of(response).await;
    assert!(body.success);
    assert!(body.replay_key.starts_with("evt_replay_replay_"));
}

#[tokio::test]
async fn test_recover_session_restart() {
    let app = create_test_app();
    let session = BillingSession {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        status: SessionStatus::Failed,
        items_processed: 10,
        window_start: None,
        window_end: None,
        last_error: Some("boom".to_string()),
        superseded_by: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    app.ledger.insert_session(session.clone());
    let router = create_router(app.state);

    let payload = serde_json::json!({"strategy": "restart"});
    let response = router
        .oneshot(post_json(
            &format!("/recovery/sessions/{}", session.id),
            &payload,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: RecoverSessionResponse = body_of(response).await;
    assert_eq!(body.superseded_session_id, Some(session.id));
    assert_ne!(body.session_id, session.id);
}

#[tokio::test]
async fn test_health_endpoints() {
    let app = create_test_app();
    let router = create_router(Arc::clone(&app.state));

    let response = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: HealthResponse = body_of(response).await;
    assert_eq!(health.status, HealthStatus::Healthy);

    let live = router.clone().oneshot(get("/health/live")).await.unwrap();
    assert_eq!(live.status(), StatusCode::OK);

    let ready = router.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    // Ledger outage degrades readiness and overall health
    app.ledger.set_healthy(false);
    let ready = router.clone().oneshot(get("/health/ready")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = router.oneshot(get("/health")).await.unwrap();
    let health: HealthResponse = body_of(response).await;
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(health.ledger, HealthStatus::Unhealthy);
}
