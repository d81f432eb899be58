//! Fee pricing for liquidation transactions.
//!
//! Both strategies are seeded with the priority-fee hint the caller already
//! fetched (and retried) so the sender never falls back to a made-up tip.

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::ChainResult;

const WEI_PER_GWEI: f64 = 1e9;

/// Fee fields for one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    /// Pre-EIP-1559 pricing.
    Legacy { gas_price: u128 },
    /// EIP-1559 pricing.
    Eip1559 {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        /// Base fee of the block the params were derived from.
        base_fee: u128,
    },
}

impl GasParams {
    /// Upper bound paid per unit of gas.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }
}

/// Fee pricing model selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GasPricing {
    #[default]
    Eip1559,
    Legacy,
}

/// Strategy that turns chain state plus a priority-fee hint into fee fields.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Derive fee parameters for the next transaction.
    async fn fetch_params(&self, rpc_url: &str, priority_fee: u128) -> ChainResult<GasParams>;

    /// Write the fee fields onto a transaction request.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    fn strategy_name(&self) -> &'static str;
}

/// Build the configured gas strategy.
pub fn create_gas_strategy(
    pricing: GasPricing,
    max_fee_multiplier: f64,
    max_gas_price_gwei: f64,
) -> Box<dyn GasStrategy> {
    let cap = (max_gas_price_gwei * WEI_PER_GWEI) as u128;
    match pricing {
        GasPricing::Eip1559 => Box::new(Eip1559GasStrategy::new(max_fee_multiplier, cap)),
        GasPricing::Legacy => Box::new(LegacyGasStrategy::new(cap)),
    }
}
