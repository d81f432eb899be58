//! Legacy (single gas price) fee strategy for chains without EIP-1559.

use super::{GasParams, GasStrategy};
use crate::{ChainError, ChainResult};
use alloy::network::TransactionBuilder;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;

/// Prices `gas_price = node gas price + tip`, capped.
#[derive(Debug)]
pub struct LegacyGasStrategy {
    /// Maximum gas price in wei.
    max_gas_price: u128,
}

impl LegacyGasStrategy {
    pub fn new(max_gas_price: u128) -> Self {
        Self { max_gas_price }
    }

    fn calculate_params(&self, node_price: u128, priority_fee: u128) -> GasParams {
        GasParams::Legacy {
            gas_price: node_price.saturating_add(priority_fee).min(self.max_gas_price),
        }
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str, priority_fee: u128) -> ChainResult<GasParams> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let node_price = provider
            .get_gas_price()
            .await
            .map_err(ChainError::transport)?;

        Ok(self.calculate_params(node_price, priority_fee))
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        tx.set_gas_price(params.effective_gas_price());
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}
