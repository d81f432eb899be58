//! Periodic liquidation price refresh.
//!
//! Liquidation prices drift as funding accrues, so every tracked position is
//! re-read on a slow schedule and the queue and store are reconciled.

use alloy::primitives::U256;
use keeper_chain::{LiquidationChain, TokenId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::KeeperConfig;
use crate::position::Position;
use crate::position_queue::PositionSet;
use crate::stats::KeeperStats;
use crate::store::PositionStore;

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub rpc_batch_size: usize,
    pub rpc_batch_wait: Duration,
    /// Also re-read positions whose price is unknown.
    pub include_pending: bool,
}

impl RefreshSettings {
    pub fn from_keeper(config: &KeeperConfig) -> Self {
        Self {
            interval: config.refresh.refresh_interval(),
            rpc_batch_size: config.batch.max_batch_size_for_rpc_batch_request,
            rpc_batch_wait: config.batch.rpc_batch_wait(),
            include_pending: config.refresh.include_pending,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub checked: usize,
    pub updated: usize,
    /// Zero price: the position is gone on chain.
    pub removed: usize,
    /// Left the queue between the snapshot and the update.
    pub vanished: usize,
    pub failed_chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reconciled {
    Updated,
    Removed,
    Vanished,
}

pub struct PriceRefreshScheduler {
    chain: Arc<dyn LiquidationChain>,
    positions: Arc<dyn PositionSet>,
    store: Arc<dyn PositionStore>,
    stats: Arc<KeeperStats>,
    settings: RefreshSettings,
}

impl PriceRefreshScheduler {
    pub fn new(
        chain: Arc<dyn LiquidationChain>,
        positions: Arc<dyn PositionSet>,
        store: Arc<dyn PositionStore>,
        stats: Arc<KeeperStats>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            chain,
            positions,
            store,
            stats,
            settings,
        }
    }

    /// Refresh every `interval`, starting one interval after launch.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = period.as_secs(), "Price refresh scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                _ = shutdown.changed() => {
                    info!("Price refresh scheduler stopping");
                    break;
                }
            }
        }
    }

    /// Re-read liquidation prices for a snapshot of the tracked positions.
    ///
    /// A failed chunk is logged and skipped.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshReport {
        let mut ids: Vec<TokenId> = self.positions.all().iter().map(|p| p.token_id).collect();
        if self.settings.include_pending {
            ids.extend(self.positions.all_pending().iter().map(|p| p.token_id));
        }

        let mut report = RefreshReport::default();
        for chunk in ids.chunks(self.settings.rpc_batch_size.max(1)) {
            match self.chain.liquidation_price_batch(chunk).await {
                Ok(prices) => {
                    report.checked += prices.len();
                    self.apply_chunk(prices, &mut report).await;
                }
                Err(e) => {
                    report.failed_chunks += 1;
                    warn!(chunk_len = chunk.len(), first_token_id = chunk[0], error = %e, "Price refresh chunk failed");
                }
            }
            tokio::time::sleep(self.settings.rpc_batch_wait).await;
        }

        self.stats.record_refresh();
        info!(
            checked = report.checked,
            updated = report.updated,
            removed = report.removed,
            vanished = report.vanished,
            failed_chunks = report.failed_chunks,
            "Liquidation prices refreshed"
        );
        report
    }

    /// Update the queue under its own lock, then mirror the outcome to the store
    /// with one write for the whole chunk.
    async fn apply_chunk(&self, prices: Vec<(TokenId, U256)>, report: &mut RefreshReport) {
        let mut saves = Vec::new();
        for (token_id, price) in prices {
            match self.reconcile(token_id, price) {
                Reconciled::Updated => {
                    report.updated += 1;
                    saves.push((token_id, Some(price)));
                }
                Reconciled::Removed => {
                    report.removed += 1;
                    if let Err(e) = self.store.delete(token_id).await {
                        warn!(token_id, error = %e, "Failed to delete closed position from store");
                    }
                }
                Reconciled::Vanished => report.vanished += 1,
            }
        }

        if saves.is_empty() {
            return;
        }
        if let Err(e) = self.store.save_batch(&saves).await {
            warn!(count = saves.len(), error = %e, "Failed to persist refreshed prices");
        }

        // A liquidation may have deleted a row between the queue update and
        // the save; drop whatever the save brought back.
        for &(token_id, _) in &saves {
            if self.positions.by_token_id(token_id).is_none() {
                if let Err(e) = self.store.delete(token_id).await {
                    warn!(token_id, error = %e, "Failed to drop stale store row");
                }
            }
        }
    }

    fn reconcile(&self, token_id: TokenId, price: U256) -> Reconciled {
        if price.is_zero() {
            if !self.positions.remove(token_id) {
                debug!(token_id, "Position left the queue during refresh");
                return Reconciled::Vanished;
            }
            debug!(token_id, "Position closed, removed");
            return Reconciled::Removed;
        }

        if !self.positions.update_if_tracked(Position::new(token_id, price)) {
            debug!(token_id, "Position left the queue during refresh");
            return Reconciled::Vanished;
        }
        Reconciled::Updated
    }
}
