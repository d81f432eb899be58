//! Startup restore of the position queue.
//!
//! Stored positions are re-priced from chain, then the token id range past
//! the highest stored id is scanned for positions opened while the keeper
//! was down.

use anyhow::{Context, Result};
use keeper_chain::{LiquidationChain, TokenId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::KeeperConfig;
use crate::position::Position;
use crate::position_queue::PositionSet;
use crate::store::PositionStore;

#[derive(Debug, Clone)]
pub struct BootstrapSettings {
    pub rpc_batch_size: usize,
    pub rpc_batch_wait: Duration,
    /// Extra ids scanned past the chain's next unassigned token id.
    pub token_id_lookahead: u64,
}

impl BootstrapSettings {
    pub fn from_keeper(config: &KeeperConfig) -> Self {
        Self {
            rpc_batch_size: config.batch.max_batch_size_for_rpc_batch_request,
            rpc_batch_wait: config.batch.rpc_batch_wait(),
            token_id_lookahead: config.bootstrap.token_id_lookahead,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub loaded: usize,
    pub restored: usize,
    /// Stored positions whose chain price came back zero.
    pub dropped: usize,
    pub discovered: usize,
}

pub struct Bootstrapper {
    chain: Arc<dyn LiquidationChain>,
    positions: Arc<dyn PositionSet>,
    store: Arc<dyn PositionStore>,
    settings: BootstrapSettings,
}

impl Bootstrapper {
    pub fn new(
        chain: Arc<dyn LiquidationChain>,
        positions: Arc<dyn PositionSet>,
        store: Arc<dyn PositionStore>,
        settings: BootstrapSettings,
    ) -> Self {
        Self {
            chain,
            positions,
            store,
            settings,
        }
    }

    /// Restore stored positions, then discover new ones. Any failure aborts.
    pub async fn run(&self) -> Result<BootstrapReport> {
        let start = Instant::now();
        info!("Restoring open positions");

        match self.restore().await {
            Ok(report) => {
                info!(
                    loaded = report.loaded,
                    restored = report.restored,
                    dropped = report.dropped,
                    discovered = report.discovered,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Finished restoring open positions"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "Failed to initialize positions");
                Err(e)
            }
        }
    }

    async fn restore(&self) -> Result<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let batch = self.settings.rpc_batch_size.max(1);

        let mut stored: Vec<TokenId> = self
            .store
            .list_all()
            .await
            .context("loading stored positions")?
            .into_iter()
            .map(|p| p.token_id)
            .collect();
        stored.sort_unstable();
        report.loaded = stored.len();
        info!(count = stored.len(), "Positions loaded from store");

        for chunk in stored.chunks(batch) {
            let prices = self
                .chain
                .liquidation_price_batch(chunk)
                .await
                .context("refreshing stored liquidation prices")?;
            for (token_id, price) in prices {
                if price.is_zero() {
                    self.store.delete(token_id).await?;
                    report.dropped += 1;
                    debug!(token_id, "Stored position no longer open");
                } else {
                    self.positions.insert_or_update(Position::new(token_id, price));
                    report.restored += 1;
                }
            }
            tokio::time::sleep(self.settings.rpc_batch_wait).await;
        }

        let mut from = stored.last().map_or(0, |last| last + 1);
        let to = self
            .chain
            .next_token_id()
            .await
            .context("reading next token id")?
            + self.settings.token_id_lookahead;
        info!(from, to, "Scanning for positions opened while offline");

        let step = batch as TokenId;
        while from < to {
            let snapshots = self
                .chain
                .position_data_range(from, from + step)
                .await
                .with_context(|| format!("reading positions {from}..={}", from + step))?;
            for snapshot in snapshots.into_iter().filter(|s| !s.liquidation_price.is_zero()) {
                self.store
                    .save_or_update(snapshot.token_id, Some(snapshot.liquidation_price))
                    .await?;
                self.positions
                    .insert_or_update(Position::new(snapshot.token_id, snapshot.liquidation_price));
                report.discovered += 1;
            }
            from += step + 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_queue::PositionQueue;
    use crate::store::MemoryStore;
    use crate::test_utils::MockChain;
    use alloy::primitives::U256;
    use keeper_chain::PositionSnapshot;
    use std::sync::atomic::Ordering;

    fn settings() -> BootstrapSettings {
        BootstrapSettings {
            rpc_batch_size: 10,
            rpc_batch_wait: Duration::from_millis(500),
            token_id_lookahead: 10,
        }
    }

    fn snapshot(token_id: TokenId, price: u64) -> PositionSnapshot {
        PositionSnapshot {
            token_id,
            liquidation_price: U256::from(price),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_restores_stored_and_discovers_new_positions() {
        let chain = Arc::new(MockChain::new().with_price(1, 1000).with_price(4, 1200));
        chain.next_token_id.store(20, Ordering::SeqCst);
        chain
            .snapshots
            .lock()
            .extend([snapshot(6, 900), snapshot(7, 0), snapshot(25, 1100)]);

        let store = Arc::new(MemoryStore::new());
        for id in [4, 1, 2] {
            store.save_or_update(id, Some(U256::from(1u64))).await.unwrap();
        }
        let queue = Arc::new(PositionQueue::new());

        let report = Bootstrapper::new(chain.clone(), queue.clone(), store.clone(), settings())
            .run()
            .await
            .unwrap();

        assert_eq!(
            report,
            BootstrapReport {
                loaded: 3,
                restored: 2,
                dropped: 1,
                discovered: 2,
            }
        );
        assert_eq!(queue.by_token_id(4), Some(Position::new(4, U256::from(1200u64))));
        assert_eq!(queue.by_token_id(25), Some(Position::new(25, U256::from(1100u64))));
        assert!(queue.by_token_id(2).is_none());
        assert!(queue.by_token_id(7).is_none());
        assert!(store.get(2).is_none());
        assert_eq!(store.get(6), Some(Some(U256::from(900u64))));

        // Scan starts after the highest stored id and runs to next id + lookahead.
        assert_eq!(*chain.range_calls.lock(), vec![(5, 15), (16, 26), (27, 37)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_store_scans_from_zero() {
        let chain = Arc::new(MockChain::new());
        chain.next_token_id.store(0, Ordering::SeqCst);
        let queue = Arc::new(PositionQueue::new());

        let report = Bootstrapper::new(chain.clone(), queue, Arc::new(MemoryStore::new()), settings())
            .run()
            .await
            .unwrap();

        assert_eq!(report, BootstrapReport::default());
        assert_eq!(*chain.range_calls.lock(), vec![(0, 10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_failure_aborts_bootstrap() {
        let chain = Arc::new(MockChain::new());
        chain.fail_price_batch.store(true, Ordering::SeqCst);
        let store = Arc::new(MemoryStore::new());
        store.save_or_update(1, Some(U256::from(1u64))).await.unwrap();

        let result = Bootstrapper::new(chain.clone(), Arc::new(PositionQueue::new()), store, settings())
            .run()
            .await;

        assert!(result.is_err());
        assert!(chain.range_calls.lock().is_empty());
    }
}
