//! Webhook replay and session recovery scenarios.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use delegation_billing_engine::app::{ErrorRecoveryService, RecoveryConfig};
use delegation_billing_engine::domain::{
    AppError, BillingSession, LedgerStore, RecoverSessionRequest, ReplayWebhookRequest,
    SessionStatus, WebhookEvent, WebhookIngestor,
};
use delegation_billing_engine::test_utils::{MockIngestor, MockLedger};

fn stored_event(replay_count: i32) -> WebhookEvent {
    WebhookEvent {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        event_id: "evt_123".to_string(),
        payload: serde_json::json!({"type": "invoice.paid"}),
        failure_count: 2,
        replay_count,
        last_failed_at: Some(Utc::now() - Duration::hours(2)),
        created_at: Utc::now() - Duration::days(1),
    }
}

fn service(
    ledger: &Arc<MockLedger>,
    ingestors: Vec<Arc<dyn WebhookIngestor>>,
) -> ErrorRecoveryService {
    ErrorRecoveryService::new(Arc::clone(ledger) as _, ingestors, RecoveryConfig::default())
}

fn replay_request(event: &WebhookEvent, force: bool) -> ReplayWebhookRequest {
    ReplayWebhookRequest {
        workspace_id: event.workspace_id,
        provider: event.provider.clone(),
        event_id: event.event_id.clone(),
        force_replay: force,
    }
}

#[tokio::test]
async fn replay_uses_fresh_key_and_bumps_counter_only() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let event = stored_event(0);
    let original_payload = event.payload.clone();
    ledger.insert_webhook_event(event.clone());

    let service = service(&ledger, vec![Arc::clone(&ingestor) as _]);
    let response = service
        .replay_webhook_event(&replay_request(&event, false))
        .await
        .unwrap();

    assert!(response.success);
    assert!(response.replay_key.starts_with("evt_123_replay_"));
    assert_ne!(response.replay_key, event.event_id);

    // The ingestion path saw the original payload untouched
    assert_eq!(ingestor.calls().len(), 1);
    let stored = ledger
        .get_webhook_event(event.workspace_id, "stripe", "evt_123")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.replay_count, 1);
    assert_eq!(stored.payload, original_payload);
    assert_eq!(stored.failure_count, event.failure_count);

    let attempts = ledger.replay_attempts();
    assert_eq!(attempts.len(), 1);
    assert!(attempts[0].1);
}

#[tokio::test]
async fn replay_failure_is_recorded_but_not_an_error() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::failing("stripe", "schema drift"));
    let event = stored_event(0);
    ledger.insert_webhook_event(event.clone());

    let service = service(&ledger, vec![ingestor as _]);
    let response = service
        .replay_webhook_event(&replay_request(&event, false))
        .await
        .unwrap();

    assert!(!response.success);
    assert!(response.message.contains("schema drift"));

    let attempts = ledger.replay_attempts();
    assert_eq!(attempts.len(), 1);
    assert!(!attempts[0].1);
    assert!(attempts[0].2.as_deref().unwrap().contains("schema drift"));
}

#[tokio::test]
async fn replay_ceiling_requires_force() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let event = stored_event(3);
    ledger.insert_webhook_event(event.clone());

    let service = service(&ledger, vec![Arc::clone(&ingestor) as _]);

    let denied = service
        .replay_webhook_event(&replay_request(&event, false))
        .await;
    assert!(matches!(denied, Err(AppError::Validation(_))));
    assert!(ingestor.calls().is_empty());

    // force_replay bypasses the ceiling
    let response = service
        .replay_webhook_event(&replay_request(&event, true))
        .await
        .unwrap();
    assert!(response.success);
    assert_eq!(ingestor.calls().len(), 1);
}

#[tokio::test]
async fn replay_of_unknown_event_is_not_found() {
    let ledger = Arc::new(MockLedger::new());
    let service = service(&ledger, vec![Arc::new(MockIngestor::new("stripe")) as _]);

    let request = ReplayWebhookRequest {
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        event_id: "evt_missing".to_string(),
        force_replay: false,
    };
    let result = service.replay_webhook_event(&request).await;
    assert!(matches!(
        result,
        Err(AppError::Database(
            delegation_billing_engine::domain::DatabaseError::NotFound(_)
        ))
    ));
}

fn failed_session() -> BillingSession {
    BillingSession {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: "stripe".to_string(),
        status: SessionStatus::Failed,
        items_processed: 42,
        window_start: Some(Utc::now() - Duration::days(7)),
        window_end: Some(Utc::now()),
        last_error: Some("timeout".to_string()),
        superseded_by: None,
        created_at: Utc::now() - Duration::hours(3),
        updated_at: Utc::now() - Duration::hours(1),
    }
}

#[tokio::test]
async fn resume_reactivates_session_in_place() {
    let ledger = Arc::new(MockLedger::new());
    let session = failed_session();
    ledger.insert_session(session.clone());

    let service = service(&ledger, vec![]);
    let response = service
        .recover_session(
            session.id,
            &RecoverSessionRequest {
                strategy: "resume".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(response.session_id, session.id);
    assert!(response.superseded_session_id.is_none());

    let stored = ledger.session(session.id).unwrap();
    assert_eq!(stored.status, SessionStatus::Running);
    // Progress is preserved on resume
    assert_eq!(stored.items_processed, 42);
}

#[tokio::test]
async fn restart_supersedes_old_session_and_zeroes_progress() {
    let ledger = Arc::new(MockLedger::new());
    let session = failed_session();
    ledger.insert_session(session.clone());

    let service = service(&ledger, vec![]);
    let response = service
        .recover_session(
            session.id,
            &RecoverSessionRequest {
                strategy: "restart".to_string(),
            },
        )
        .await
        .unwrap();

    assert_ne!(response.session_id, session.id);
    assert_eq!(response.superseded_session_id, Some(session.id));

    let old = ledger.session(session.id).unwrap();
    assert_eq!(old.status, SessionStatus::Superseded);
    assert_eq!(old.superseded_by, Some(response.session_id));

    let replacement = ledger.session(response.session_id).unwrap();
    assert_eq!(replacement.status, SessionStatus::Running);
    assert_eq!(replacement.items_processed, 0);
    assert_eq!(replacement.window_start, session.window_start);
    assert_eq!(replacement.window_end, session.window_end);
    assert!(replacement.last_error.is_none());
}

#[tokio::test]
async fn completed_session_is_not_recoverable() {
    let ledger = Arc::new(MockLedger::new());
    let mut session = failed_session();
    session.status = SessionStatus::Completed;
    ledger.insert_session(session.clone());

    let service = service(&ledger, vec![]);
    let result = service
        .recover_session(
            session.id,
            &RecoverSessionRequest {
                strategy: "resume".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn unknown_strategy_is_rejected() {
    let ledger = Arc::new(MockLedger::new());
    let session = failed_session();
    ledger.insert_session(session.clone());

    let service = service(&ledger, vec![]);
    let result = service
        .recover_session(
            session.id,
            &RecoverSessionRequest {
                strategy: "rewind".to_string(),
            },
        )
        .await;
    assert!(matches!(result, Err(AppError::Validation(_))));
}
