//! Dead-letter reprocessing scenarios.

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use delegation_billing_engine::app::{DeadLetterConfig, DeadLetterProcessor};
use delegation_billing_engine::domain::{DeadLetterDisposition, DeadLetterMessage, WebhookIngestor};
use delegation_billing_engine::test_utils::{MockIngestor, MockLedger};

fn message(provider: &str, retry_attempt: i32, age: Duration) -> DeadLetterMessage {
    DeadLetterMessage {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        provider: provider.to_string(),
        event_id: format!("evt_{}", Uuid::new_v4().simple()),
        payload: serde_json::json!({"type": "subscription.created"}),
        failure_count: 3,
        last_failed_at: Utc::now() - age,
        retry_attempt,
    }
}

fn processor(
    ledger: &Arc<MockLedger>,
    ingestors: Vec<Arc<dyn WebhookIngestor>>,
    config: DeadLetterConfig,
) -> DeadLetterProcessor {
    DeadLetterProcessor::new(Arc::clone(ledger) as _, ingestors, config)
}

#[tokio::test]
async fn successful_reingestion_resolves_message() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let message = message("stripe", 0, Duration::hours(1));
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![Arc::clone(&ingestor) as _], DeadLetterConfig::default());
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.total, 1);
    assert_eq!(report.resolved, 1);
    assert!(!report.has_unresolved());
    assert_eq!(ingestor.calls().len(), 1);
    assert_eq!(
        ledger.disposition(message_id).unwrap().disposition,
        DeadLetterDisposition::Resolved
    );
}

#[tokio::test]
async fn failed_reingestion_requeues_and_increments_attempt() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::failing("stripe", "provider 500"));
    let message = message("stripe", 1, Duration::hours(1));
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![ingestor as _], DeadLetterConfig::default());
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.requeued, 1);
    assert!(report.has_unresolved());

    let stored = ledger
        .dead_letters()
        .into_iter()
        .find(|m| m.id == message_id)
        .unwrap();
    assert_eq!(stored.retry_attempt, 2);
    let disposition = ledger.disposition(message_id).unwrap();
    assert_eq!(disposition.disposition, DeadLetterDisposition::Requeue);
    assert!(disposition.error.unwrap().contains("provider 500"));
}

#[tokio::test]
async fn ceiling_parks_message_permanently() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let config = DeadLetterConfig {
        max_retry_attempts: 5,
        ..Default::default()
    };
    let message = message("stripe", 5, Duration::hours(1));
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![Arc::clone(&ingestor) as _], config);
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.permanently_failed, 1);
    // No reprocessing attempt was made
    assert!(ingestor.calls().is_empty());
    assert_eq!(
        ledger.disposition(message_id).unwrap().disposition,
        DeadLetterDisposition::PermanentlyFailed
    );
}

#[tokio::test]
async fn message_inside_backoff_window_is_left_untouched() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let config = DeadLetterConfig {
        backoff_base: Duration::minutes(5),
        ..Default::default()
    };
    // One prior attempt, failed seconds ago: still inside the 5min window
    let message = message("stripe", 1, Duration::seconds(10));
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![Arc::clone(&ingestor) as _], config);
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.requeued, 1);
    assert!(ingestor.calls().is_empty());
    // Deferral records nothing; the attempt counter reflects real attempts only
    assert!(ledger.disposition(message_id).is_none());
    let stored = ledger
        .dead_letters()
        .into_iter()
        .find(|m| m.id == message_id)
        .unwrap();
    assert_eq!(stored.retry_attempt, 1);
}

#[tokio::test]
async fn duplicate_event_is_resolved_without_reingestion() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let message = message("stripe", 0, Duration::hours(1));
    let message_id = message.id;
    ledger.mark_event_processed(message.workspace_id, &message.provider, &message.event_id);
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![Arc::clone(&ingestor) as _], DeadLetterConfig::default());
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.resolved, 1);
    assert!(ingestor.calls().is_empty());
    assert_eq!(
        ledger.disposition(message_id).unwrap().disposition,
        DeadLetterDisposition::Resolved
    );
}

#[tokio::test]
async fn malformed_payload_is_parked_immediately() {
    let ledger = Arc::new(MockLedger::new());
    let ingestor = Arc::new(MockIngestor::new("stripe"));
    let mut message = message("stripe", 0, Duration::hours(1));
    message.payload = serde_json::json!("not an object");
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(&ledger, vec![Arc::clone(&ingestor) as _], DeadLetterConfig::default());
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.permanently_failed, 1);
    assert!(ingestor.calls().is_empty());
    let disposition = ledger.disposition(message_id).unwrap();
    assert!(disposition.error.unwrap().contains("malformed payload"));
}

#[tokio::test]
async fn unknown_provider_is_parked() {
    let ledger = Arc::new(MockLedger::new());
    let message = message("unheard_of", 0, Duration::hours(1));
    let message_id = message.id;
    ledger.insert_dead_letter(message);

    let processor = processor(
        &ledger,
        vec![Arc::new(MockIngestor::new("stripe")) as _],
        DeadLetterConfig::default(),
    );
    let report = processor.process_batch().await.unwrap();

    assert_eq!(report.permanently_failed, 1);
    let disposition = ledger.disposition(message_id).unwrap();
    assert!(disposition.error.unwrap().contains("no ingestor"));
}
