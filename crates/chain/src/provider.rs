//! Read-side RPC access to the leverage, liquidation and viewer contracts.
//! Uses Alloy providers for type-safe RPC interactions.

use alloy::primitives::{Address, U256};
use alloy::providers::{Provider, ProviderBuilder};
use futures::future::join_all;
use tracing::{debug, info};

use crate::contracts::{ILeverageModule, ILiquidationModule, IViewer};
use crate::{token_id_from_u256, ChainError, ChainResult, TokenId};

/// Contract addresses the keeper talks to.
#[derive(Debug, Clone, Copy)]
pub struct ContractAddresses {
    pub liquidation_module: Address,
    pub leverage_module: Address,
    pub viewer: Address,
}

/// Position as reported by the viewer contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    pub token_id: TokenId,
    pub liquidation_price: U256,
}

/// Provider manager for the keeper's read path.
#[derive(Clone)]
pub struct ProviderManager {
    /// HTTP URL for contract reads
    read_url: String,
    addresses: ContractAddresses,
}

impl ProviderManager {
    /// Create a provider manager and verify the endpoint answers.
    pub async fn new(read_url: &str, addresses: ContractAddresses) -> ChainResult<Self> {
        info!(
            read = read_url,
            liquidation_module = %addresses.liquidation_module,
            leverage_module = %addresses.leverage_module,
            viewer = %addresses.viewer,
            "Initializing provider manager"
        );

        let manager = Self {
            read_url: read_url.to_string(),
            addresses,
        };

        let block = manager.block_number().await?;
        info!(block = block, "Provider connection verified");

        Ok(manager)
    }

    fn http(&self) -> ChainResult<impl Provider> {
        let url = self
            .read_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid rpc url {}: {e}", self.read_url)))?;
        Ok(ProviderBuilder::new().on_http(url))
    }

    pub async fn block_number(&self) -> ChainResult<u64> {
        self.http()?
            .get_block_number()
            .await
            .map_err(ChainError::transport)
    }

    /// Eligibility for a chunk of positions, queried concurrently.
    /// Fails as a whole if any single query fails.
    pub async fn can_liquidate_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, bool)>> {
        let provider = self.http()?;
        let module = ILiquidationModule::new(self.addresses.liquidation_module, &provider);

        let calls = token_ids.iter().map(|&token_id| {
            let module = &module;
            async move {
                module
                    .canLiquidate(U256::from(token_id))
                    .call()
                    .await
                    .map(|r| (token_id, r.liquidatable))
                    .map_err(ChainError::transport)
            }
        });

        let results: ChainResult<Vec<_>> = join_all(calls).await.into_iter().collect();
        let results = results?;
        debug!(
            checked = results.len(),
            eligible = results.iter().filter(|(_, ok)| *ok).count(),
            "Eligibility batch complete"
        );
        Ok(results)
    }

    /// Current liquidation price. Zero means the position no longer exists.
    pub async fn liquidation_price(&self, token_id: TokenId) -> ChainResult<U256> {
        let provider = self.http()?;
        let module = ILiquidationModule::new(self.addresses.liquidation_module, &provider);
        let result = module
            .liquidationPrice(U256::from(token_id))
            .call()
            .await
            .map_err(ChainError::transport)?;
        Ok(result.liqPrice)
    }

    /// Liquidation prices for a chunk of positions, queried concurrently.
    pub async fn liquidation_price_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, U256)>> {
        let provider = self.http()?;
        let module = ILiquidationModule::new(self.addresses.liquidation_module, &provider);

        let calls = token_ids.iter().map(|&token_id| {
            let module = &module;
            async move {
                module
                    .liquidationPrice(U256::from(token_id))
                    .call()
                    .await
                    .map(|r| (token_id, r.liqPrice))
                    .map_err(ChainError::transport)
            }
        });

        join_all(calls).await.into_iter().collect()
    }

    /// Next token id the leverage module will assign.
    pub async fn token_id_next(&self) -> ChainResult<TokenId> {
        let provider = self.http()?;
        let module = ILeverageModule::new(self.addresses.leverage_module, &provider);
        let result = module
            .tokenIdNext()
            .call()
            .await
            .map_err(ChainError::transport)?;
        token_id_from_u256(result._0)
    }

    /// Positions in `[from, to]` according to the viewer contract.
    pub async fn position_data(&self, from: TokenId, to: TokenId) -> ChainResult<Vec<PositionSnapshot>> {
        let provider = self.http()?;
        let viewer = IViewer::new(self.addresses.viewer, &provider);
        let result = viewer
            .getPositionData(U256::from(from), U256::from(to))
            .call()
            .await
            .map_err(ChainError::transport)?;

        result
            .positionData
            .into_iter()
            .map(|p| {
                Ok(PositionSnapshot {
                    token_id: token_id_from_u256(p.tokenId)?,
                    liquidation_price: p.liquidationPrice,
                })
            })
            .collect()
    }

    /// Pending-inclusive transaction count of `address`.
    pub async fn transaction_count(&self, address: Address) -> ChainResult<u64> {
        self.http()?
            .get_transaction_count(address)
            .pending()
            .await
            .map_err(ChainError::transport)
    }

    /// Node's suggested priority fee in wei.
    pub async fn max_priority_fee_per_gas(&self) -> ChainResult<u128> {
        self.http()?
            .get_max_priority_fee_per_gas()
            .await
            .map_err(ChainError::transport)
    }
}

impl std::fmt::Debug for ProviderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderManager")
            .field("read_url", &self.read_url)
            .field("addresses", &self.addresses)
            .finish()
    }
}
