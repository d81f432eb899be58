//! EIP-1559 fee strategy.

use super::{GasParams, GasStrategy};
use crate::{ChainError, ChainResult};
use alloy::eips::BlockNumberOrTag;
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// Prices `max_fee = base_fee * multiplier + tip`, capped.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Headroom over the latest base fee (2.0 survives roughly six full blocks).
    max_fee_multiplier: f64,
    /// Hard ceiling on `max_fee_per_gas` in wei.
    max_fee_cap: u128,
}

impl Eip1559GasStrategy {
    pub fn new(max_fee_multiplier: f64, max_fee_cap: u128) -> Self {
        Self {
            max_fee_multiplier,
            max_fee_cap,
        }
    }

    fn calculate_params(&self, base_fee: u128, priority_fee: u128) -> GasParams {
        let max_fee = ((base_fee as f64) * self.max_fee_multiplier) as u128 + priority_fee;
        let max_fee_per_gas = max_fee.min(self.max_fee_cap);
        GasParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas: priority_fee.min(max_fee_per_gas),
            base_fee,
        }
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str, priority_fee: u128) -> ChainResult<GasParams> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let block = provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(ChainError::transport)?
            .ok_or_else(|| ChainError::InvalidResponse("latest block not found".into()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(u128::from)
            .ok_or_else(|| ChainError::InvalidResponse("latest block has no base fee".into()))?;

        Ok(self.calculate_params(base_fee, priority_fee))
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(*gas_price);
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}
