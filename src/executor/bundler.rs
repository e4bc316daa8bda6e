//! Bundler-backed delegation redemption executor.
//!
//! Owns the full blockchain-facing protocol: parse and validate the
//! delegation, resolve the network, build the user operation, fetch a gas
//! quote, submit through the relay, and await inclusion. All persistence is
//! the caller's responsibility; this type never touches the ledger.
//!
//! A single redeemer account signs every operation, so submissions are
//! serialized through one async mutex to keep nonces ordered regardless of
//! how many processor workers call in concurrently.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::domain::{AppError, RedeemRequest, RedemptionError, RedemptionExecutor};

use super::delegation::SignedDelegation;
use super::networks::{NetworkConfig, NetworkRegistry};
use super::userop::{
    GasPriceTiers, UserOperation, encode_erc20_transfer, encode_redeem_call, parse_address,
    scale_amount, to_hex,
};

/// Tuning for the submission and confirmation loops.
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    /// Attempts for transient relay errors during submission. This is a
    /// small, fixed-backoff loop scoped to a single call; the
    /// subscription-level retry schedule lives in the processor.
    pub submit_attempts: u32,
    pub submit_backoff: Duration,
    /// Deadline for inclusion after submission
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            submit_backoff: Duration::from_secs(2),
            confirmation_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(2),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Receipt returned by the bundler once an operation is included.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOperationReceipt {
    success: bool,
    #[serde(default)]
    reason: Option<String>,
    receipt: TransactionReceipt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    transaction_hash: String,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Executor that redeems delegations through an ERC-4337 bundler.
pub struct BundlerExecutor {
    http: reqwest::Client,
    networks: NetworkRegistry,
    /// Smart-account address of the redeemer; must equal each delegation's
    /// delegate.
    redeemer_address: String,
    signer_key: SecretString,
    config: BundlerConfig,
    /// Single-writer lock in front of the signer (nonce ordering).
    submission_lock: Mutex<u64>,
}

impl BundlerExecutor {
    pub fn new(
        networks: NetworkRegistry,
        redeemer_address: String,
        signer_key: SecretString,
        config: BundlerConfig,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            networks,
            redeemer_address,
            signer_key,
            config,
            submission_lock: Mutex::new(0),
        })
    }

    #[must_use]
    pub fn redeemer_address(&self) -> &str {
        &self.redeemer_address
    }

    async fn rpc_call<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<Option<T>, RedemptionError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RedemptionError::RelayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RedemptionError::RelayUnavailable(format!(
                "relay returned HTTP {}",
                response.status()
            )));
        }

        let parsed: JsonRpcResponse<T> = response
            .json()
            .await
            .map_err(|e| RedemptionError::RelayUnavailable(format!("invalid relay response: {}", e)))?;

        if let Some(error) = parsed.error {
            return Err(classify_rpc_error(error.code, &error.message));
        }
        Ok(parsed.result)
    }

    async fn fetch_gas_price(&self, network: &NetworkConfig) -> Result<GasPriceTiers, RedemptionError> {
        self.rpc_call::<GasPriceTiers>(
            &network.bundler_url,
            "pimlico_getUserOperationGasPrice",
            json!([]),
        )
        .await
        .map_err(|e| match e {
            RedemptionError::RelayUnavailable(msg) => RedemptionError::GasEstimation(msg),
            other => other,
        })?
        .ok_or_else(|| RedemptionError::GasEstimation("relay returned no gas quote".to_string()))
    }

    /// Sign the operation with the redeemer key. The account's verification
    /// scheme is owned by the wallet stack; here the signature is a keyed
    /// digest over the calldata the paymaster checks against.
    fn sign_operation(&self, call_data: &[u8], nonce: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.signer_key.expose_secret().as_bytes());
        hasher.update(self.redeemer_address.as_bytes());
        hasher.update(nonce.to_be_bytes());
        hasher.update(call_data);
        to_hex(&hasher.finalize())
    }

    /// Submit with a small fixed-backoff loop for transient relay errors.
    /// Permanent failures (reverts, insufficient balance) break out
    /// immediately.
    async fn submit_operation(
        &self,
        network: &NetworkConfig,
        operation: &UserOperation,
    ) -> Result<String, RedemptionError> {
        let mut last_error =
            RedemptionError::RelayUnavailable("no submission attempt made".to_string());

        for attempt in 1..=self.config.submit_attempts {
            match self
                .rpc_call::<String>(
                    &network.bundler_url,
                    "eth_sendUserOperation",
                    json!([operation, network.chain_id]),
                )
                .await
            {
                Ok(Some(user_op_hash)) => return Ok(user_op_hash),
                Ok(None) => {
                    last_error = RedemptionError::RelayUnavailable(
                        "relay accepted submission but returned no hash".to_string(),
                    );
                }
                Err(e) if e.class() == crate::domain::ErrorClass::Temporary => {
                    warn!(attempt, error = %e, "Transient relay error during submission");
                    last_error = e;
                }
                Err(e) => return Err(e),
            }

            if attempt < self.config.submit_attempts {
                tokio::time::sleep(self.config.submit_backoff).await;
            }
        }

        Err(last_error)
    }

    async fn get_receipt(
        &self,
        network: &NetworkConfig,
        user_op_hash: &str,
    ) -> Result<Option<UserOperationReceipt>, RedemptionError> {
        self.rpc_call::<UserOperationReceipt>(
            &network.bundler_url,
            "eth_getUserOperationReceipt",
            json!([user_op_hash]),
        )
        .await
    }

    /// Poll for inclusion until the confirmation deadline. On deadline, one
    /// final reconciliation read decides between landed-late success and an
    /// unknown outcome; the caller must not blindly retry the latter.
    async fn await_confirmation(
        &self,
        network: &NetworkConfig,
        user_op_hash: &str,
    ) -> Result<String, RedemptionError> {
        let deadline = tokio::time::Instant::now() + self.config.confirmation_timeout;

        while tokio::time::Instant::now() < deadline {
            match self.get_receipt(network, user_op_hash).await {
                Ok(Some(receipt)) => return receipt_to_outcome(receipt),
                Ok(None) => {}
                Err(e) => {
                    debug!(error = %e, "Receipt poll failed; will retry until deadline");
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        // Reconciliation read: the operation may have landed while we were
        // timing out.
        if let Ok(Some(receipt)) = self.get_receipt(network, user_op_hash).await {
            return receipt_to_outcome(receipt);
        }

        Err(RedemptionError::ConfirmationTimeout {
            user_op_hash: user_op_hash.to_string(),
        })
    }
}

fn receipt_to_outcome(receipt: UserOperationReceipt) -> Result<String, RedemptionError> {
    if receipt.success {
        Ok(receipt.receipt.transaction_hash)
    } else {
        Err(RedemptionError::ExecutionReverted(
            receipt
                .reason
                .unwrap_or_else(|| "execution reverted without reason".to_string()),
        ))
    }
}

/// Map a JSON-RPC error onto the redemption taxonomy.
fn classify_rpc_error(code: i64, message: &str) -> RedemptionError {
    let lowered = message.to_lowercase();
    if lowered.contains("insufficient") && (lowered.contains("balance") || lowered.contains("allowance"))
    {
        RedemptionError::InsufficientBalance(message.to_string())
    } else if lowered.contains("revert") {
        RedemptionError::ExecutionReverted(message.to_string())
    } else if (-32099..=-32000).contains(&code) {
        // Server-side errors are transient relay trouble
        RedemptionError::RelayUnavailable(message.to_string())
    } else {
        RedemptionError::ExecutionReverted(message.to_string())
    }
}

#[async_trait]
impl RedemptionExecutor for BundlerExecutor {
    async fn health_check(&self) -> Result<(), AppError> {
        let network = self.networks.any().ok_or_else(|| {
            AppError::Config(crate::domain::ConfigError::Missing(
                "no networks configured".to_string(),
            ))
        })?;
        self.rpc_call::<Vec<String>>(&network.bundler_url, "eth_supportedEntryPoints", json!([]))
            .await
            .map_err(AppError::Redemption)?;
        Ok(())
    }

    #[instrument(skip(self, request), fields(chain_id = %request.chain_id, network = %request.network_name))]
    async fn redeem(&self, request: &RedeemRequest) -> Result<String, AppError> {
        // 1. Deserialize and 2. validate the delegation
        let delegation = SignedDelegation::parse(&request.delegation_data)
            .map_err(AppError::Redemption)?;
        delegation
            .validate(&self.redeemer_address, Utc::now())
            .map_err(AppError::Redemption)?;

        // 3. Resolve network configuration
        let network = self
            .networks
            .resolve(request.chain_id, &request.network_name)
            .map_err(AppError::Redemption)?;

        // 4. Build the execution payload
        let merchant = parse_address("merchant_address", &request.merchant_address)?;
        let raw_amount = scale_amount(request.token_amount, request.token_decimals)?;
        let transfer = encode_erc20_transfer(&merchant, raw_amount);
        let call_data = encode_redeem_call(&delegation, &transfer);

        // 5. Gas quote, then serialized submission behind the signer lock
        let gas = self
            .fetch_gas_price(&network)
            .await
            .map_err(AppError::Redemption)?;

        let user_op_hash = {
            let mut nonce = self.submission_lock.lock().await;
            *nonce += 1;
            let operation = UserOperation {
                sender: self.redeemer_address.clone(),
                nonce: format!("0x{:x}", *nonce),
                call_data: to_hex(&call_data),
                max_fee_per_gas: gas.fast.max_fee_per_gas.clone(),
                max_priority_fee_per_gas: gas.fast.max_priority_fee_per_gas.clone(),
                signature: self.sign_operation(&call_data, *nonce),
            };
            self.submit_operation(&network, &operation)
                .await
                .map_err(AppError::Redemption)?
        };

        debug!(user_op_hash = %user_op_hash, "User operation submitted");

        // 6-7. Await inclusion and return the transaction hash
        self.await_confirmation(&network, &user_op_hash)
            .await
            .map_err(AppError::Redemption)
    }

    async fn confirm_settlement(
        &self,
        user_op_hash: &str,
        chain_id: u64,
        network_name: &str,
    ) -> Result<Option<String>, AppError> {
        let network = self
            .networks
            .resolve(chain_id, network_name)
            .map_err(AppError::Redemption)?;

        match self.get_receipt(&network, user_op_hash).await {
            Ok(Some(receipt)) if receipt.success => Ok(Some(receipt.receipt.transaction_hash)),
            // A reverted receipt means the operation landed but moved no
            // funds; safe to treat as not settled.
            Ok(Some(_)) | Ok(None) => Ok(None),
            Err(e) => Err(AppError::Redemption(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rpc_error() {
        assert!(matches!(
            classify_rpc_error(-32500, "AA21 didn't pay prefund: insufficient balance"),
            RedemptionError::InsufficientBalance(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32500, "execution reverted: ERC20: transfer amount exceeds allowance"),
            RedemptionError::ExecutionReverted(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32000, "internal relay error"),
            RedemptionError::RelayUnavailable(_)
        ));
        assert!(matches!(
            classify_rpc_error(-32601, "method not found"),
            RedemptionError::ExecutionReverted(_)
        ));
    }

    #[test]
    fn test_bundler_config_defaults() {
        let config = BundlerConfig::default();
        assert_eq!(config.submit_attempts, 3);
        assert_eq!(config.confirmation_timeout, Duration::from_secs(60));
        assert!(config.poll_interval < config.confirmation_timeout);
    }
}
