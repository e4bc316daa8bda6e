//! The redemption processor: drives due subscriptions through redemption
//! with deterministic idempotency and bounded concurrency.
//!
//! Discovery pulls oldest-due-first; each item is dispatched to a worker
//! bounded by a counting semaphore (the downstream relay is rate limited
//! and a single signer account fronts every submission). Per-subscription
//! mutual exclusion comes from the ledger's compare-and-set lock, so
//! overlapping processor runs are safe by construction. A single item's
//! failure never aborts its siblings; the processor waits for the whole
//! batch before returning.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::Rng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::domain::{
    AppError, AttemptOutcome, AttemptStatus, BillingRunReport, DeadLetterMessage, ErrorClass,
    EventKind, LedgerEvent, LedgerStore, OperatorAlerter, RedeemRequest, RedemptionAttempt,
    RedemptionError, RedemptionExecutor, Subscription, billing_idempotency_key,
};

/// Retry/backoff/concurrency tuning for the processor.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Worker-pool bound; respects the relay's rate limits
    pub concurrency: usize,
    /// Max subscriptions pulled per discovery tick
    pub batch_size: i64,
    /// Retries before a temporary failure is declared permanent
    pub max_retries: i32,
    pub backoff_base: Duration,
    pub backoff_multiplier: i32,
    pub backoff_cap: Duration,
    /// Reclaim `processing` rows older than this
    pub stale_lock_after: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 25,
            max_retries: 4,
            backoff_base: Duration::minutes(1),
            backoff_multiplier: 2,
            backoff_cap: Duration::hours(1),
            stale_lock_after: Duration::minutes(10),
        }
    }
}

/// Pure exponential backoff: `min(base * multiplier^(n-1), cap)` for the
/// n-th retry (n >= 1). Monotone and capped.
#[must_use]
pub fn backoff(config: &ProcessorConfig, retry_count: i32) -> Duration {
    let exponent = (retry_count - 1).clamp(0, 30) as u32;
    let factor = i64::from(config.backoff_multiplier).saturating_pow(exponent);
    let delay = config
        .backoff_base
        .num_seconds()
        .saturating_mul(factor);
    Duration::seconds(delay.min(config.backoff_cap.num_seconds()))
}

/// What happened to one subscription in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Succeeded,
    RetryScheduled,
    PermanentlyFailed,
    /// Lock not acquired; another worker owns the item
    Skipped,
    /// A prior unknown-outcome attempt was resolved without re-spending
    Reconciled,
}

/// Bounded-concurrency redemption processor.
pub struct RedemptionProcessor {
    ledger: Arc<dyn LedgerStore>,
    executor: Arc<dyn RedemptionExecutor>,
    alerter: Arc<dyn OperatorAlerter>,
    config: ProcessorConfig,
}

impl RedemptionProcessor {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        executor: Arc<dyn RedemptionExecutor>,
        alerter: Arc<dyn OperatorAlerter>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            ledger,
            executor,
            alerter,
            config,
        }
    }

    /// One discovery/dispatch tick. Lists due subscriptions, fans them out
    /// to the worker pool, and joins the whole batch.
    #[instrument(skip(self))]
    pub async fn run_billing_cycle(self: &Arc<Self>) -> Result<BillingRunReport, AppError> {
        let now = Utc::now();
        let due = self
            .ledger
            .list_due_subscriptions(now, self.config.batch_size)
            .await?;

        let mut report = BillingRunReport {
            discovered: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return Ok(report);
        }

        info!(count = due.len(), "Processing due subscriptions");

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for subscription in due {
            let processor = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                // Closed only if the pool itself is shutting down
                let _permit = semaphore.acquire_owned().await;
                let id = subscription.id;
                match processor.process_subscription(subscription).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!(subscription_id = %id, error = %e, "Worker failed outside outcome handling");
                        if e.class() == ErrorClass::System {
                            processor
                                .alerter
                                .system_alert("redemption worker", &e)
                                .await;
                        }
                        ItemOutcome::Skipped
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(ItemOutcome::Succeeded) => report.succeeded += 1,
                Ok(ItemOutcome::RetryScheduled) => report.retries_scheduled += 1,
                Ok(ItemOutcome::PermanentlyFailed) => report.permanently_failed += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Ok(ItemOutcome::Reconciled) => report.reconciled += 1,
                Err(e) => {
                    error!(error = %e, "Worker task panicked");
                    report.skipped += 1;
                }
            }
        }

        info!(
            succeeded = report.succeeded,
            retried = report.retries_scheduled,
            failed = report.permanently_failed,
            skipped = report.skipped,
            "Billing cycle complete"
        );
        Ok(report)
    }

    /// Watchdog: return `processing` rows stuck past the staleness
    /// threshold to `past_due` so the next tick can pick them up.
    #[instrument(skip(self))]
    pub async fn reclaim_stale_locks(&self) -> Result<u64, AppError> {
        let stale_before = Utc::now() - self.config.stale_lock_after;
        let reclaimed = self.ledger.reclaim_stale_processing(stale_before).await?;
        if reclaimed > 0 {
            warn!(count = reclaimed, "Reclaimed stale processing locks");
        }
        Ok(reclaimed)
    }

    /// Drive a single subscription through one redemption attempt.
    async fn process_subscription(
        &self,
        subscription: Subscription,
    ) -> Result<ItemOutcome, AppError> {
        // Acquire the per-subscription lock. Losing the race is not an
        // error; another worker or an overlapping run owns the item.
        let Some(locked) = self.ledger.begin_processing(subscription.id).await? else {
            return Ok(ItemOutcome::Skipped);
        };

        let idempotency_key = billing_idempotency_key(locked.id, locked.current_period_start);

        // Reconcile any earlier attempt for this billing period before
        // risking a second spend against the same allowance.
        if let Some(prior) = self.ledger.find_attempt(&idempotency_key).await? {
            match prior.status {
                AttemptStatus::Succeeded => {
                    // Charged but the cycle was not advanced (crash between
                    // the two writes). Complete the bookkeeping only.
                    let tx = prior.transaction_hash.clone().unwrap_or_default();
                    self.complete_success(&locked, &tx).await?;
                    return Ok(ItemOutcome::Reconciled);
                }
                AttemptStatus::Unknown | AttemptStatus::InFlight => {
                    if let Some(resolution) = self.reconcile_attempt(&locked, &prior).await? {
                        return Ok(resolution);
                    }
                    // Not settled on-chain; safe to attempt again.
                }
                AttemptStatus::Failed => {}
            }
        }

        let attempt = self.build_attempt(&locked, &idempotency_key).await?;
        self.ledger.record_attempt(&attempt).await?;

        // A missing or unreadable delegation is a redemption failure, not a
        // worker fault; it must release the lock through the failure policy.
        let request = match self.build_redeem_request(&locked).await {
            Ok(request) => request,
            Err(e) => return self.handle_failure(&locked, &attempt, e).await,
        };
        match self.executor.redeem(&request).await {
            Ok(transaction_hash) => {
                self.ledger
                    .record_attempt_outcome(
                        attempt.id,
                        &AttemptOutcome::Succeeded {
                            transaction_hash: transaction_hash.clone(),
                        },
                    )
                    .await?;
                self.complete_success(&locked, &transaction_hash).await?;
                Ok(ItemOutcome::Succeeded)
            }
            Err(e) => self.handle_failure(&locked, &attempt, e).await,
        }
    }

    /// Ask the chain whether a prior submission landed before retrying.
    /// Returns `Some` when the attempt was resolved either way.
    async fn reconcile_attempt(
        &self,
        subscription: &Subscription,
        prior: &RedemptionAttempt,
    ) -> Result<Option<ItemOutcome>, AppError> {
        let Some(user_op_hash) = prior.user_op_hash.as_deref() else {
            // No operation hash was ever recorded, so nothing on-chain can
            // be tied to this attempt. Close it out; leaving it in-flight
            // would trip the live-key guard on every subsequent run.
            self.ledger
                .record_attempt_outcome(
                    prior.id,
                    &AttemptOutcome::Failed {
                        error_message: "abandoned before submission; no operation hash recorded"
                            .to_string(),
                    },
                )
                .await?;
            return Ok(None);
        };

        let settled = self
            .executor
            .confirm_settlement(
                user_op_hash,
                subscription.chain_id as u64,
                &subscription.network_name,
            )
            .await?;

        match settled {
            Some(transaction_hash) => {
                info!(
                    subscription_id = %subscription.id,
                    transaction_hash = %transaction_hash,
                    "Unknown-outcome attempt settled on-chain; recording success"
                );
                self.ledger
                    .record_attempt_outcome(
                        prior.id,
                        &AttemptOutcome::Succeeded {
                            transaction_hash: transaction_hash.clone(),
                        },
                    )
                    .await?;
                self.complete_success(subscription, &transaction_hash).await?;
                Ok(Some(ItemOutcome::Reconciled))
            }
            None => {
                self.ledger
                    .record_attempt_outcome(
                        prior.id,
                        &AttemptOutcome::Failed {
                            error_message: "not settled on-chain after confirmation timeout"
                                .to_string(),
                        },
                    )
                    .await?;
                Ok(None)
            }
        }
    }

    async fn build_attempt(
        &self,
        subscription: &Subscription,
        idempotency_key: &str,
    ) -> Result<RedemptionAttempt, AppError> {
        Ok(RedemptionAttempt {
            id: uuid::Uuid::new_v4(),
            subscription_id: Some(subscription.id),
            delegation_id: subscription.delegation_id,
            idempotency_key: idempotency_key.to_string(),
            merchant_address: subscription.merchant_address.clone(),
            token_address: subscription.token_address.clone(),
            token_amount: subscription.token_amount,
            token_decimals: subscription.token_decimals,
            chain_id: subscription.chain_id,
            status: AttemptStatus::InFlight,
            transaction_hash: None,
            user_op_hash: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    async fn build_redeem_request(
        &self,
        subscription: &Subscription,
    ) -> Result<RedeemRequest, AppError> {
        let delegation = self
            .ledger
            .get_delegation(subscription.delegation_id)
            .await?
            .ok_or_else(|| {
                AppError::Redemption(RedemptionError::MalformedDelegation(format!(
                    "delegation {} not found",
                    subscription.delegation_id
                )))
            })?;

        Ok(RedeemRequest {
            delegation_data: delegation.data,
            merchant_address: subscription.merchant_address.clone(),
            token_contract_address: subscription.token_address.clone(),
            token_amount: subscription.token_amount.max(0) as u64,
            token_decimals: subscription.token_decimals.max(0) as u32,
            chain_id: subscription.chain_id.max(0) as u64,
            network_name: subscription.network_name.clone(),
        })
    }

    /// Success path: advance the period, reset retry bookkeeping, release
    /// the lock back to `active`, and append the audit event.
    async fn complete_success(
        &self,
        subscription: &Subscription,
        transaction_hash: &str,
    ) -> Result<(), AppError> {
        let interval = subscription.billing_interval;
        let next_start = subscription.current_period_end;
        let next_end = interval.advance(next_start);

        self.ledger
            .finish_billing_cycle(subscription.id, next_start, next_end, next_end)
            .await?;

        self.ledger
            .append_event(&LedgerEvent::new(
                subscription.id,
                EventKind::PaymentSucceeded {
                    transaction_hash: transaction_hash.to_string(),
                    token_amount: subscription.token_amount,
                    period_start: subscription.current_period_start,
                },
            ))
            .await?;
        Ok(())
    }

    /// Failure path: classify and apply retry/backoff/dead-letter policy.
    async fn handle_failure(
        &self,
        subscription: &Subscription,
        attempt: &RedemptionAttempt,
        error: AppError,
    ) -> Result<ItemOutcome, AppError> {
        let class = error.class();
        let message = error.to_string();

        // Unknown outcomes keep their operation hash so the next run can
        // reconcile before retrying.
        let outcome = match &error {
            AppError::Redemption(RedemptionError::ConfirmationTimeout { user_op_hash }) => {
                AttemptOutcome::Unknown {
                    user_op_hash: user_op_hash.clone(),
                }
            }
            _ => AttemptOutcome::Failed {
                error_message: message.clone(),
            },
        };
        self.ledger.record_attempt_outcome(attempt.id, &outcome).await?;

        if class == ErrorClass::System {
            self.alerter.system_alert("redemption execution", &error).await;
        }

        let retry_count = subscription.retry_count + 1;
        let retries_exhausted = retry_count > self.config.max_retries;
        let permanent = matches!(class, ErrorClass::Permanent | ErrorClass::Validation);

        if permanent || (retries_exhausted && class != ErrorClass::Unknown) {
            warn!(
                subscription_id = %subscription.id,
                error = %message,
                retry_count,
                "Permanent redemption failure"
            );
            self.ledger
                .mark_permanently_failed(subscription.id, &message)
                .await?;
            self.ledger
                .append_event(&LedgerEvent::new(
                    subscription.id,
                    EventKind::PaymentPermanentlyFailed {
                        reason: message.clone(),
                    },
                ))
                .await?;
            self.hand_off_dead_letter(subscription, attempt, &message).await?;
            return Ok(ItemOutcome::PermanentlyFailed);
        }

        // Unknown outcomes past the ceiling still get one more scheduled
        // pass; the reconciliation guard resolves them without re-spending.
        let delay = backoff(&self.config, retry_count);
        let next_retry_at = Utc::now() + with_jitter(delay);

        warn!(
            subscription_id = %subscription.id,
            error = %message,
            retry_count,
            next_retry_at = %next_retry_at,
            "Redemption failed; retry scheduled"
        );

        self.ledger
            .schedule_retry(subscription.id, retry_count, next_retry_at, &message)
            .await?;
        self.ledger
            .append_event(&LedgerEvent::new(
                subscription.id,
                EventKind::PaymentRetryScheduled {
                    retry_count,
                    next_retry_at,
                    reason: message,
                },
            ))
            .await?;
        Ok(ItemOutcome::RetryScheduled)
    }

    /// Hand a permanently failed item to the dead-letter table for operator
    /// review.
    async fn hand_off_dead_letter(
        &self,
        subscription: &Subscription,
        attempt: &RedemptionAttempt,
        reason: &str,
    ) -> Result<(), AppError> {
        let message = DeadLetterMessage {
            id: uuid::Uuid::new_v4(),
            workspace_id: subscription.workspace_id,
            provider: "billing_engine".to_string(),
            event_id: attempt.idempotency_key.clone(),
            payload: serde_json::json!({
                "subscription_id": subscription.id,
                "attempt_id": attempt.id,
                "reason": reason,
            }),
            failure_count: subscription.retry_count + 1,
            last_failed_at: Utc::now(),
            retry_attempt: 0,
        };
        self.ledger.enqueue_dead_letter(&message).await
    }
}

/// Add up to 10% random jitter so retries scheduled in the same tick do
/// not re-dispatch as a thundering herd. Never shortens the delay.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = delay.num_seconds() / 10;
    if max_jitter <= 0 {
        return delay;
    }
    delay + Duration::seconds(rand::thread_rng().gen_range(0..=max_jitter))
}
