//! Test utilities and mock implementations.

pub mod mocks;

pub use mocks::{
    MockConfig, MockExecutor, MockIngestor, MockLedger, RecordingAlerter, RecordedDisposition,
    due_subscription, valid_delegation, valid_delegation_for,
};
