//! Parsing and validation of signed spending delegations.
//!
//! The cryptographic scheme behind the signature is owned by the wallet
//! stack upstream; this module enforces the validation contract the
//! redemption pipeline depends on: structural integrity, expiry, and that
//! the configured redeemer is the delegation's delegate. The delegate check
//! is a security invariant, not advisory — a delegation naming a different
//! delegate must never be submitted.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::RedemptionError;

/// A deserialized signed delegation envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignedDelegation {
    /// Smart-account owner granting the allowance
    pub delegator: String,
    /// Address authorized to redeem
    pub delegate: String,
    /// Hex-encoded signature over the delegation
    pub signature: String,
    /// Unix timestamp after which the delegation is void; None = no expiry
    #[serde(default)]
    pub expiry: Option<i64>,
    /// Maximum raw token units the delegate may move
    #[serde(default)]
    pub allowance: Option<u64>,
    /// Anti-replay salt chosen at signing time
    #[serde(default)]
    pub salt: Option<String>,
}

impl SignedDelegation {
    /// Deserialize the wire form. Structurally incomplete payloads fail
    /// with `MalformedDelegation`.
    pub fn parse(data: &str) -> Result<Self, RedemptionError> {
        let delegation: SignedDelegation = serde_json::from_str(data).map_err(|e| {
            RedemptionError::MalformedDelegation(format!("not a delegation envelope: {}", e))
        })?;

        if delegation.delegator.trim().is_empty() {
            return Err(RedemptionError::MalformedDelegation(
                "missing delegator".to_string(),
            ));
        }
        if delegation.delegate.trim().is_empty() {
            return Err(RedemptionError::MalformedDelegation(
                "missing delegate".to_string(),
            ));
        }
        if delegation.signature.trim().is_empty() {
            return Err(RedemptionError::MalformedDelegation(
                "missing signature".to_string(),
            ));
        }

        Ok(delegation)
    }

    /// Signature well-formedness: 65-byte hex, not all zeroes.
    pub fn check_signature_integrity(&self) -> Result<(), RedemptionError> {
        let stripped = self.signature.trim_start_matches("0x");
        let bytes = hex::decode(stripped).map_err(|_| {
            RedemptionError::MalformedDelegation("signature is not valid hex".to_string())
        })?;
        if bytes.len() != 65 {
            return Err(RedemptionError::MalformedDelegation(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }
        if bytes.iter().all(|b| *b == 0) {
            return Err(RedemptionError::MalformedDelegation(
                "signature is all zeroes".to_string(),
            ));
        }
        Ok(())
    }

    /// Full validation contract: signature integrity, expiry, delegate match.
    pub fn validate(&self, redeemer_address: &str, now: DateTime<Utc>) -> Result<(), RedemptionError> {
        self.check_signature_integrity()?;

        if let Some(expiry) = self.expiry {
            let expired_at = Utc
                .timestamp_opt(expiry, 0)
                .single()
                .ok_or_else(|| {
                    RedemptionError::MalformedDelegation(format!("invalid expiry: {}", expiry))
                })?;
            if expired_at <= now {
                return Err(RedemptionError::DelegationExpired { expired_at });
            }
        }

        if !self.delegate.eq_ignore_ascii_case(redeemer_address) {
            return Err(RedemptionError::DelegateMismatch {
                expected: redeemer_address.to_string(),
                actual: self.delegate.clone(),
            });
        }

        Ok(())
    }

    /// Signature bytes with the 0x prefix stripped. Callers must have run
    /// `check_signature_integrity` first.
    #[must_use]
    pub fn signature_bytes(&self) -> Vec<u8> {
        hex::decode(self.signature.trim_start_matches("0x")).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const REDEEMER: &str = "0x00000000000000000000000000000000000000aa";

    fn valid_delegation() -> String {
        serde_json::json!({
            "delegator": "0x00000000000000000000000000000000000000bb",
            "delegate": REDEEMER,
            "signature": format!("0x{}", "ab".repeat(65)),
            "expiry": (Utc::now() + Duration::days(30)).timestamp(),
            "allowance": 1_000_000_000u64,
            "salt": "0x01"
        })
        .to_string()
    }

    #[test]
    fn test_parse_valid_delegation() {
        let delegation = SignedDelegation::parse(&valid_delegation()).unwrap();
        assert_eq!(delegation.delegate, REDEEMER);
        assert!(delegation.validate(REDEEMER, Utc::now()).is_ok());
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        for broken in [
            r#"{"delegate":"0xaa","signature":"0xbb"}"#,
            r#"{"delegator":"0xaa","signature":"0xbb"}"#,
            r#"{"delegator":"0xaa","delegate":"0xbb"}"#,
            r#"{"delegator":"","delegate":"0xbb","signature":"0xcc"}"#,
            "not json at all",
        ] {
            assert!(
                matches!(
                    SignedDelegation::parse(broken),
                    Err(RedemptionError::MalformedDelegation(_))
                ),
                "expected malformed: {broken}"
            );
        }
    }

    #[test]
    fn test_validate_rejects_expired() {
        let mut delegation = SignedDelegation::parse(&valid_delegation()).unwrap();
        delegation.expiry = Some((Utc::now() - Duration::hours(1)).timestamp());
        assert!(matches!(
            delegation.validate(REDEEMER, Utc::now()),
            Err(RedemptionError::DelegationExpired { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_delegate_mismatch() {
        let delegation = SignedDelegation::parse(&valid_delegation()).unwrap();
        let result = delegation.validate("0x00000000000000000000000000000000000000cc", Utc::now());
        assert!(matches!(
            result,
            Err(RedemptionError::DelegateMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_delegate_match_is_case_insensitive() {
        let delegation = SignedDelegation::parse(&valid_delegation()).unwrap();
        assert!(
            delegation
                .validate(&REDEEMER.to_uppercase().replace("0X", "0x"), Utc::now())
                .is_ok()
        );
    }

    #[test]
    fn test_signature_integrity() {
        let mut delegation = SignedDelegation::parse(&valid_delegation()).unwrap();

        delegation.signature = "0x1234".to_string();
        assert!(delegation.check_signature_integrity().is_err());

        delegation.signature = format!("0x{}", "00".repeat(65));
        assert!(delegation.check_signature_integrity().is_err());

        delegation.signature = "zzzz".to_string();
        assert!(delegation.check_signature_integrity().is_err());
    }

    #[test]
    fn test_no_expiry_is_valid() {
        let mut delegation = SignedDelegation::parse(&valid_delegation()).unwrap();
        delegation.expiry = None;
        assert!(delegation.validate(REDEEMER, Utc::now()).is_ok());
    }
}
