//! Recurring-billing engine that charges customers by redeeming pre-signed
//! on-chain spending delegations through ERC-4337 user operations.
//!
//! Layering:
//! - [`domain`]: types, errors, and the trait seams everything is wired by
//! - [`executor`]: the blockchain-facing redemption executor
//! - [`app`]: the redemption processor, dead-letter processor, recovery
//!   service, and background workers
//! - [`infra`]: PostgreSQL ledger, alerting, and webhook re-ingestion
//! - [`api`]: the HTTP surface

pub mod api;
pub mod app;
pub mod domain;
pub mod executor;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
