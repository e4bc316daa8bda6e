//! Application state management.

use std::sync::Arc;

use crate::domain::{LedgerStore, OperatorAlerter, RedemptionExecutor, WebhookIngestor};

use super::dead_letter::{DeadLetterConfig, DeadLetterProcessor};
use super::processor::{ProcessorConfig, RedemptionProcessor};
use super::recovery::{ErrorRecoveryService, RecoveryConfig};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<RedemptionProcessor>,
    pub dead_letter: Arc<DeadLetterProcessor>,
    pub recovery: Arc<ErrorRecoveryService>,
    pub ledger: Arc<dyn LedgerStore>,
    pub executor: Arc<dyn RedemptionExecutor>,
}

impl AppState {
    /// Wire the services from their seams with default tuning.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        executor: Arc<dyn RedemptionExecutor>,
        alerter: Arc<dyn OperatorAlerter>,
        ingestors: Vec<Arc<dyn WebhookIngestor>>,
    ) -> Self {
        Self::with_configs(
            ledger,
            executor,
            alerter,
            ingestors,
            ProcessorConfig::default(),
            DeadLetterConfig::default(),
            RecoveryConfig::default(),
        )
    }

    #[must_use]
    pub fn with_configs(
        ledger: Arc<dyn LedgerStore>,
        executor: Arc<dyn RedemptionExecutor>,
        alerter: Arc<dyn OperatorAlerter>,
        ingestors: Vec<Arc<dyn WebhookIngestor>>,
        processor_config: ProcessorConfig,
        dead_letter_config: DeadLetterConfig,
        recovery_config: RecoveryConfig,
    ) -> Self {
        let processor = Arc::new(RedemptionProcessor::new(
            Arc::clone(&ledger),
            Arc::clone(&executor),
            alerter,
            processor_config,
        ));
        let dead_letter = Arc::new(DeadLetterProcessor::new(
            Arc::clone(&ledger),
            ingestors.clone(),
            dead_letter_config,
        ));
        let recovery = Arc::new(ErrorRecoveryService::new(
            Arc::clone(&ledger),
            ingestors,
            recovery_config,
        ));
        Self {
            processor,
            dead_letter,
            recovery,
            ledger,
            executor,
        }
    }
}
