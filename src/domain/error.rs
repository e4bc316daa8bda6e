//! Error types for the billing engine, grouped by failure domain.
//!
//! Every fallible boundary converts its failures into [`AppError`] so the
//! processor can classify them with [`ErrorClass`] and apply the right
//! retry policy: validation failures are never retried, permanent domain
//! failures go terminal, temporary failures back off, unknown outcomes are
//! reconciled against the chain, and system failures page an operator.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad input; fail fast, never retry.
    Validation,
    /// Domain failure that will not heal on its own; terminal.
    Permanent,
    /// Transient failure; eligible for backoff retry.
    Temporary,
    /// Outcome unknown (e.g. confirmation timeout after submission);
    /// must be reconciled before any retry.
    Unknown,
    /// Infrastructure failure; retried like temporary but also paged.
    System,
}

/// Typed failures of the delegation redemption pipeline.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RedemptionError {
    #[error("Malformed delegation: {0}")]
    MalformedDelegation(String),

    #[error("Delegation expired at {expired_at}")]
    DelegationExpired { expired_at: DateTime<Utc> },

    #[error("Delegation delegate {actual} does not match configured redeemer {expected}")]
    DelegateMismatch { expected: String, actual: String },

    #[error("Unsupported network: chain_id={chain_id} name={network}")]
    UnsupportedNetwork { chain_id: u64, network: String },

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Execution reverted: {0}")]
    ExecutionReverted(String),

    #[error("Relay unavailable: {0}")]
    RelayUnavailable(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Confirmation timed out for user operation {user_op_hash}")]
    ConfirmationTimeout { user_op_hash: String },
}

impl RedemptionError {
    /// Map each failure onto its retry class.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MalformedDelegation(_) => ErrorClass::Validation,
            Self::DelegationExpired { .. }
            | Self::DelegateMismatch { .. }
            | Self::UnsupportedNetwork { .. }
            | Self::InsufficientBalance(_)
            | Self::ExecutionReverted(_) => ErrorClass::Permanent,
            Self::RelayUnavailable(_) | Self::GasEstimation(_) => ErrorClass::Temporary,
            Self::ConfirmationTimeout { .. } => ErrorClass::Unknown,
        }
    }
}

/// Database operation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Database query error: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::RowNotFound => Self::NotFound(e.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Duplicate(e.to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => Self::Connection(e.to_string()),
            _ => Self::Query(e.to_string()),
        }
    }
}

/// Input validation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {0}")]
    Multiple(String),
}

/// External service errors (alert webhook, provider ingestion endpoints)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExternalServiceError {
    #[error("External service unavailable: {0}")]
    Unavailable(String),

    #[error("External service timeout: {0}")]
    Timeout(String),

    #[error("External service rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid response from external service: {0}")]
    InvalidResponse(String),
}

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: String, message: String },
}

/// Top-level application error
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AppError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Redemption(#[from] RedemptionError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    ExternalService(#[from] ExternalServiceError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl AppError {
    /// Retry classification used by the redemption processor.
    ///
    /// Database and internal failures are system-class: retried, but also
    /// surfaced to the operator channel so they cannot silently accumulate
    /// as customer-visible `past_due` states.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Validation(_) => ErrorClass::Validation,
            Self::Redemption(e) => e.class(),
            Self::Database(_) | Self::Internal(_) | Self::Config(_) => ErrorClass::System,
            Self::ExternalService(_) => ErrorClass::Temporary,
            Self::Serialization(_) | Self::NotSupported(_) => ErrorClass::Validation,
        }
    }

    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation(ValidationError::InvalidField {
            field: field.into(),
            message: message.into(),
        })
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redemption_error_classes() {
        assert_eq!(
            RedemptionError::MalformedDelegation("x".into()).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            RedemptionError::DelegationExpired {
                expired_at: Utc::now()
            }
            .class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            RedemptionError::DelegateMismatch {
                expected: "0xaa".into(),
                actual: "0xbb".into()
            }
            .class(),
            ErrorClass::Permanent
        );
        assert_eq!(
            RedemptionError::RelayUnavailable("503".into()).class(),
            ErrorClass::Temporary
        );
        assert_eq!(
            RedemptionError::ConfirmationTimeout {
                user_op_hash: "0xdead".into()
            }
            .class(),
            ErrorClass::Unknown
        );
    }

    #[test]
    fn test_app_error_classes() {
        assert_eq!(
            AppError::Database(DatabaseError::Connection("down".into())).class(),
            ErrorClass::System
        );
        assert_eq!(
            AppError::invalid_field("chain_id", "must be positive").class(),
            ErrorClass::Validation
        );
        assert_eq!(
            AppError::ExternalService(ExternalServiceError::Timeout("slow".into())).class(),
            ErrorClass::Temporary
        );
    }

    #[test]
    fn test_error_display_includes_context() {
        let err = RedemptionError::DelegateMismatch {
            expected: "0xredeemer".into(),
            actual: "0xother".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("0xredeemer"));
        assert!(msg.contains("0xother"));
    }
}
