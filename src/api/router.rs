//! Router construction and HTTP middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::app::AppState;

use super::handlers::{
    ApiDoc, billing_run_handler, get_subscription_handler, health_check_handler, liveness_handler,
    list_subscription_events_handler, process_dead_letters_handler, readiness_handler,
    recover_session_handler, redeem_handler, replay_webhook_handler,
};

const MAX_BODY_BYTES: usize = 256 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Build the application router with middleware and Swagger UI.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/redemptions", post(redeem_handler))
        .route("/billing/run", post(billing_run_handler))
        .route("/subscriptions/{id}", get(get_subscription_handler))
        .route(
            "/subscriptions/{id}/events",
            get(list_subscription_events_handler),
        )
        .route("/dlq/process", post(process_dead_letters_handler))
        .route("/recovery/webhooks/replay", post(replay_webhook_handler))
        .route("/recovery/sessions/{id}", post(recover_session_handler))
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
