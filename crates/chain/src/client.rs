//! The chain surface the scheduling engine depends on.

use alloy::primitives::{B256, U256};
use async_trait::async_trait;
use std::sync::Arc;

use crate::provider::{PositionSnapshot, ProviderManager};
use crate::signer::{LiquidationRequest, TransactionSender};
use crate::{ChainResult, TokenId};

/// Chain reads and writes used by the keeper.
///
/// Batch methods fail as a whole if any element fails, so callers can treat
/// a chunk as the unit of failure.
#[async_trait]
pub trait LiquidationChain: Send + Sync {
    async fn can_liquidate_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, bool)>>;

    /// Raw liquidation price; zero means the position is gone.
    async fn liquidation_price(&self, token_id: TokenId) -> ChainResult<U256>;

    async fn liquidation_price_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, U256)>>;

    /// Fresh pending-inclusive nonce of the keeper account.
    async fn current_nonce(&self) -> ChainResult<u64>;

    /// Suggested priority fee in wei. May fail transiently.
    async fn priority_fee_hint(&self) -> ChainResult<u128>;

    /// Submit and confirm a liquidation, returning the transaction hash.
    async fn submit_liquidation(&self, request: LiquidationRequest) -> ChainResult<B256>;

    async fn next_token_id(&self) -> ChainResult<TokenId>;

    async fn position_data_range(&self, from: TokenId, to: TokenId) -> ChainResult<Vec<PositionSnapshot>>;
}

/// Production implementation over Alloy HTTP providers.
#[derive(Debug, Clone)]
pub struct ChainClient {
    provider: ProviderManager,
    sender: Arc<TransactionSender>,
}

impl ChainClient {
    pub fn new(provider: ProviderManager, sender: Arc<TransactionSender>) -> Self {
        Self { provider, sender }
    }
}

#[async_trait]
impl LiquidationChain for ChainClient {
    async fn can_liquidate_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, bool)>> {
        self.provider.can_liquidate_batch(token_ids).await
    }

    async fn liquidation_price(&self, token_id: TokenId) -> ChainResult<U256> {
        self.provider.liquidation_price(token_id).await
    }

    async fn liquidation_price_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, U256)>> {
        self.provider.liquidation_price_batch(token_ids).await
    }

    async fn current_nonce(&self) -> ChainResult<u64> {
        self.provider.transaction_count(self.sender.address).await
    }

    async fn priority_fee_hint(&self) -> ChainResult<u128> {
        self.provider.max_priority_fee_per_gas().await
    }

    async fn submit_liquidation(&self, request: LiquidationRequest) -> ChainResult<B256> {
        self.sender.send_liquidation(&request).await
    }

    async fn next_token_id(&self) -> ChainResult<TokenId> {
        self.provider.token_id_next().await
    }

    async fn position_data_range(&self, from: TokenId, to: TokenId) -> ChainResult<Vec<PositionSnapshot>> {
        self.provider.position_data(from, to).await
    }
}
