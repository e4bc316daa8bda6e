//! Infrastructure layer implementations.

pub mod alerts;
pub mod database;
pub mod ingest;

pub use alerts::{LogAlerter, WebhookAlerter};
pub use database::{PostgresConfig, PostgresLedger};
pub use ingest::HttpWebhookIngestor;
