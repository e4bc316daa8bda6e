//! Blockchain-facing delegation redemption executor.

pub mod bundler;
pub mod delegation;
pub mod networks;
pub mod userop;

pub use bundler::{BundlerConfig, BundlerExecutor};
pub use delegation::SignedDelegation;
pub use networks::{NetworkConfig, NetworkRegistry};
