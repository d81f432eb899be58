//! In-memory collaborators for scheduler tests.

use alloy::primitives::{Bytes, B256, U256};
use anyhow::Result;
use async_trait::async_trait;
use keeper_api::PriceOracle;
use keeper_chain::{
    ChainError, ChainResult, LiquidationChain, LiquidationRequest, PositionSnapshot, TokenId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Scriptable `LiquidationChain` that records every call.
#[derive(Default)]
pub struct MockChain {
    pub eligible: Mutex<HashSet<TokenId>>,
    pub prices: Mutex<HashMap<TokenId, U256>>,
    pub failing_price_ids: Mutex<HashSet<TokenId>>,
    pub rejected: Mutex<HashSet<TokenId>>,
    pub submit_delays: Mutex<HashMap<TokenId, Duration>>,
    pub nonce: AtomicU64,
    pub next_token_id: AtomicU64,
    pub snapshots: Mutex<Vec<PositionSnapshot>>,
    pub fail_eligibility: AtomicBool,
    pub fail_price_batch: AtomicBool,
    /// Remaining fee-hint calls that fail before one succeeds; `u32::MAX` never succeeds.
    pub fee_failures: AtomicU32,
    pub fee_calls: AtomicU32,
    pub eligibility_calls: Mutex<Vec<Vec<TokenId>>>,
    pub range_calls: Mutex<Vec<(TokenId, TokenId)>>,
    /// (token_id, nonce) in submission order.
    pub submitted: Mutex<Vec<(TokenId, u64)>>,
    /// (token_id, nonce) in confirmation order.
    pub confirmed: Mutex<Vec<(TokenId, u64)>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eligible(self, ids: &[TokenId]) -> Self {
        self.eligible.lock().extend(ids.iter().copied());
        self
    }

    pub fn with_price(self, token_id: TokenId, price: u64) -> Self {
        self.prices.lock().insert(token_id, U256::from(price));
        self
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.nonce.store(nonce, Ordering::SeqCst);
        self
    }

    pub fn submit_count(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn eligibility_call_count(&self) -> usize {
        self.eligibility_calls.lock().len()
    }

    fn price_of(&self, token_id: TokenId) -> ChainResult<U256> {
        if self.failing_price_ids.lock().contains(&token_id) {
            return Err(ChainError::Transport(format!("price read failed for {token_id}")));
        }
        Ok(self.prices.lock().get(&token_id).copied().unwrap_or(U256::ZERO))
    }
}

#[async_trait]
impl LiquidationChain for MockChain {
    async fn can_liquidate_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, bool)>> {
        self.eligibility_calls.lock().push(token_ids.to_vec());
        if self.fail_eligibility.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("eligibility batch failed".into()));
        }
        let eligible = self.eligible.lock();
        Ok(token_ids.iter().map(|&id| (id, eligible.contains(&id))).collect())
    }

    async fn liquidation_price(&self, token_id: TokenId) -> ChainResult<U256> {
        self.price_of(token_id)
    }

    async fn liquidation_price_batch(&self, token_ids: &[TokenId]) -> ChainResult<Vec<(TokenId, U256)>> {
        if self.fail_price_batch.load(Ordering::SeqCst) {
            return Err(ChainError::Transport("price batch failed".into()));
        }
        token_ids.iter().map(|&id| Ok((id, self.price_of(id)?))).collect()
    }

    async fn current_nonce(&self) -> ChainResult<u64> {
        Ok(self.nonce.load(Ordering::SeqCst))
    }

    async fn priority_fee_hint(&self) -> ChainResult<u128> {
        self.fee_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fee_failures.load(Ordering::SeqCst);
        if remaining == 0 {
            return Ok(1_000_000_000);
        }
        if remaining != u32::MAX {
            self.fee_failures.store(remaining - 1, Ordering::SeqCst);
        }
        Err(ChainError::Transport("fee hint timeout".into()))
    }

    async fn submit_liquidation(&self, request: LiquidationRequest) -> ChainResult<B256> {
        let token_id = request.token_id;
        self.submitted.lock().push((token_id, request.nonce));

        if self.rejected.lock().contains(&token_id) {
            return Err(ChainError::SimulationRejected {
                token_id,
                reason: "execution reverted".into(),
            });
        }

        let delay = self.submit_delays.lock().get(&token_id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.confirmed.lock().push((token_id, request.nonce));
        self.nonce.fetch_add(1, Ordering::SeqCst);
        Ok(B256::with_last_byte(token_id as u8))
    }

    async fn next_token_id(&self) -> ChainResult<TokenId> {
        Ok(self.next_token_id.load(Ordering::SeqCst))
    }

    async fn position_data_range(&self, from: TokenId, to: TokenId) -> ChainResult<Vec<PositionSnapshot>> {
        self.range_calls.lock().push((from, to));
        Ok(self
            .snapshots
            .lock()
            .iter()
            .filter(|s| s.token_id >= from && s.token_id <= to)
            .cloned()
            .collect())
    }
}

/// `PriceOracle` returning a settable price.
#[derive(Default)]
pub struct MockOracle {
    pub price: Mutex<Option<U256>>,
    pub price_calls: AtomicU32,
    pub fail_payload: AtomicBool,
}

impl MockOracle {
    pub fn with_price(price: u64) -> Self {
        Self {
            price: Mutex::new(Some(U256::from(price))),
            ..Default::default()
        }
    }

    pub fn set_price(&self, price: Option<u64>) {
        *self.price.lock() = price.map(U256::from);
    }

    pub fn price_call_count(&self) -> u32 {
        self.price_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceOracle for MockOracle {
    async fn current_price(&self) -> Result<U256> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        let price = *self.price.lock();
        price.ok_or_else(|| anyhow::anyhow!("oracle unreachable"))
    }

    async fn price_update_payload(&self) -> Result<Vec<Bytes>> {
        if self.fail_payload.load(Ordering::SeqCst) {
            anyhow::bail!("hermes unavailable");
        }
        Ok(vec![Bytes::from_static(&[0x50, 0x4e, 0x41, 0x55])])
    }
}
