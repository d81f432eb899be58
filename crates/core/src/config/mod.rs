//! Configuration system for the keeper.
//!
//! This module provides:
//! - Keeper runtime configuration (profiles, batching, timing, gas)
//! - Deployment configuration (endpoints, signer, contracts, price feed)

mod deployment;
mod keeper;

pub use deployment::{DeploymentConfig, DeploymentContracts, OracleEndpoint, RpcUrls};
pub use keeper::{
    BatchConfig, BootstrapConfig, EventsConfig, GasConfig, KeeperConfig, RefreshConfig, ScannerConfig,
};
