//! Network configuration registry.
//!
//! Maps a (chain id, network name) pair to the RPC and bundler endpoints
//! for that chain. Unknown networks are a permanent failure; the processor
//! never retries them.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::RedemptionError;

/// Endpoints and identity of one supported network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    /// Execution relay / ERC-4337 bundler endpoint
    pub bundler_url: String,
}

/// Concurrent registry of supported networks, keyed by chain id.
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    networks: DashMap<u64, NetworkConfig>,
}

impl NetworkRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a JSON array of [`NetworkConfig`] entries,
    /// as supplied by the `NETWORKS` environment variable.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let configs: Vec<NetworkConfig> = serde_json::from_str(json)?;
        let registry = Self::new();
        for config in configs {
            registry.register(config);
        }
        Ok(registry)
    }

    pub fn register(&self, config: NetworkConfig) {
        self.networks.insert(config.chain_id, config);
    }

    /// Resolve a chain id, requiring the caller-supplied name to match the
    /// registered one. A name/id disagreement is treated as unsupported
    /// rather than silently trusting either side.
    pub fn resolve(&self, chain_id: u64, network_name: &str) -> Result<NetworkConfig, RedemptionError> {
        let unsupported = || RedemptionError::UnsupportedNetwork {
            chain_id,
            network: network_name.to_string(),
        };

        let config = self.networks.get(&chain_id).ok_or_else(unsupported)?;
        if !config.name.eq_ignore_ascii_case(network_name) {
            return Err(unsupported());
        }
        Ok(config.clone())
    }

    /// An arbitrary registered network, used by connectivity probes.
    #[must_use]
    pub fn any(&self) -> Option<NetworkConfig> {
        self.networks.iter().next().map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}
