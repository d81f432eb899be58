//! Price oracle abstraction consumed by the scheduling engine.

use alloy::primitives::{Bytes, U256};
use anyhow::Result;
use async_trait::async_trait;

/// Off-chain price source.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Latest price scaled to 18 decimals.
    async fn current_price(&self) -> Result<U256>;

    /// Signed price-update blobs to forward with a liquidation.
    async fn price_update_payload(&self) -> Result<Vec<Bytes>>;
}
