//! ERC-4337 user-operation payload construction.
//!
//! Builds the calldata chain for one redemption: an ERC-20 `transfer` to
//! the merchant, wrapped in the redeemer smart-account's delegation
//! redemption entry point, packaged as a user operation for the bundler.

use serde::{Deserialize, Serialize};

use crate::domain::AppError;

use super::delegation::SignedDelegation;

/// `transfer(address,uint256)`
pub const ERC20_TRANSFER_SELECTOR: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

/// `redeemDelegations(bytes,bytes)` on the redeemer smart account
pub const REDEEM_DELEGATIONS_SELECTOR: [u8; 4] = [0xce, 0xf6, 0xd2, 0x09];

/// Parse a 0x-prefixed 20-byte address.
pub fn parse_address(field: &str, value: &str) -> Result<[u8; 20], AppError> {
    let stripped = value.trim_start_matches("0x");
    let bytes = hex::decode(stripped)
        .map_err(|_| AppError::invalid_field(field, "address is not valid hex"))?;
    bytes
        .try_into()
        .map_err(|_| AppError::invalid_field(field, "address must be 20 bytes"))
}

/// Scale a whole-token amount by the token's decimals into raw units.
pub fn scale_amount(amount: u64, decimals: u32) -> Result<u128, AppError> {
    let factor = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| AppError::invalid_field("token_decimals", "decimal factor overflow"))?;
    (amount as u128)
        .checked_mul(factor)
        .ok_or_else(|| AppError::invalid_field("token_amount", "scaled amount overflow"))
}

/// ABI-encode `transfer(merchant, raw_amount)`.
#[must_use]
pub fn encode_erc20_transfer(merchant: &[u8; 20], raw_amount: u128) -> Vec<u8> {
    let mut calldata = Vec::with_capacity(4 + 32 + 32);
    calldata.extend_from_slice(&ERC20_TRANSFER_SELECTOR);
    // address, left-padded to 32 bytes
    calldata.extend_from_slice(&[0u8; 12]);
    calldata.extend_from_slice(merchant);
    // uint256 amount, left-padded to 32 bytes
    calldata.extend_from_slice(&[0u8; 16]);
    calldata.extend_from_slice(&raw_amount.to_be_bytes());
    calldata
}

/// Wrap a token-transfer execution in the delegation-redemption call the
/// redeemer's own smart account exposes. Both payloads travel
/// length-prefixed so the account can split them without re-parsing.
#[must_use]
pub fn encode_redeem_call(delegation: &SignedDelegation, inner_calldata: &[u8]) -> Vec<u8> {
    let signature = delegation.signature_bytes();
    let mut calldata =
        Vec::with_capacity(4 + 4 + signature.len() + 4 + inner_calldata.len());
    calldata.extend_from_slice(&REDEEM_DELEGATIONS_SELECTOR);
    calldata.extend_from_slice(&(signature.len() as u32).to_be_bytes());
    calldata.extend_from_slice(&signature);
    calldata.extend_from_slice(&(inner_calldata.len() as u32).to_be_bytes());
    calldata.extend_from_slice(inner_calldata);
    calldata
}

/// One gas-price tier as quoted by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
}

/// Relay gas-price quote; submission uses the `fast` tier so redemptions
/// do not sit in the mempool past their confirmation deadline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GasPriceTiers {
    pub slow: GasPrice,
    pub standard: GasPrice,
    pub fast: GasPrice,
}

/// The execution request submitted to the bundler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserOperation {
    /// The redeemer's smart-account address
    pub sender: String,
    pub nonce: String,
    pub call_data: String,
    pub max_fee_per_gas: String,
    pub max_priority_fee_per_gas: String,
    pub signature: String,
}

/// 0x-prefixed lowercase hex.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MERCHANT: &str = "0x7bd3c6a3b5e8f1a2d4c9e0f1a2b3c4d5e6f7a8b9";

    #[test]
    fn test_parse_address() {
        let parsed = parse_address("merchant_address", MERCHANT).unwrap();
        assert_eq!(parsed[0], 0x7b);
        assert_eq!(parsed[19], 0xb9);

        assert!(parse_address("merchant_address", "0x1234").is_err());
        assert!(parse_address("merchant_address", "0xzz").is_err());
    }

    #[test]
    fn test_scale_amount() {
        assert_eq!(scale_amount(1, 6).unwrap(), 1_000_000);
        assert_eq!(scale_amount(25, 18).unwrap(), 25_000_000_000_000_000_000);
        assert!(scale_amount(u64::MAX, 30).is_err());
    }

    #[test]
    fn test_encode_erc20_transfer_layout() {
        let merchant = parse_address("merchant_address", MERCHANT).unwrap();
        let calldata = encode_erc20_transfer(&merchant, 5_000_000);

        assert_eq!(calldata.len(), 68);
        assert_eq!(&calldata[..4], &ERC20_TRANSFER_SELECTOR);
        // address word: 12 zero bytes then the address
        assert_eq!(&calldata[4..16], &[0u8; 12]);
        assert_eq!(&calldata[16..36], &merchant);
        // amount word, big-endian
        assert_eq!(&calldata[36..52], &[0u8; 16]);
        assert_eq!(&calldata[52..68], &5_000_000u128.to_be_bytes());
    }

    #[test]
    fn test_encode_redeem_call_wraps_inner_payload() {
        let delegation = SignedDelegation {
            delegator: "0xbb".to_string(),
            delegate: "0xaa".to_string(),
            signature: format!("0x{}", "ab".repeat(65)),
            expiry: None,
            allowance: None,
            salt: None,
        };
        let inner = vec![1u8, 2, 3, 4];
        let calldata = encode_redeem_call(&delegation, &inner);

        assert_eq!(&calldata[..4], &REDEEM_DELEGATIONS_SELECTOR);
        let sig_len = u32::from_be_bytes(calldata[4..8].try_into().unwrap()) as usize;
        assert_eq!(sig_len, 65);
        let inner_offset = 8 + sig_len;
        let inner_len = u32::from_be_bytes(
            calldata[inner_offset..inner_offset + 4].try_into().unwrap(),
        ) as usize;
        assert_eq!(inner_len, 4);
        assert_eq!(&calldata[inner_offset + 4..], &inner[..]);
    }

    #[test]
    fn test_user_operation_serializes_camel_case() {
        let op = UserOperation {
            sender: "0xaa".to_string(),
            nonce: "0x1".to_string(),
            call_data: "0xdead".to_string(),
            max_fee_per_gas: "0x5f5e100".to_string(),
            max_priority_fee_per_gas: "0xf4240".to_string(),
            signature: "0xsig".to_string(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert!(json.get("callData").is_some());
        assert!(json.get("maxFeePerGas").is_some());
        assert!(json.get("call_data").is_none());
    }
}
