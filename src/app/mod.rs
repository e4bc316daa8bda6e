//! Application layer containing business logic and shared state.

pub mod dead_letter;
pub mod processor;
pub mod recovery;
pub mod state;
pub mod worker;

pub use dead_letter::{DeadLetterConfig, DeadLetterProcessor};
pub use processor::{ProcessorConfig, RedemptionProcessor, backoff};
pub use recovery::{ErrorRecoveryService, RecoveryConfig};
pub use state::AppState;
pub use worker::{CrankConfig, WorkerConfig, spawn_billing_worker, spawn_reclaim_crank};
