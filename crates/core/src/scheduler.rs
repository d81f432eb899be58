//! The keeper loop.
//!
//! Every tick probes the pending positions, then compares the oracle price
//! with the riskiest tracked position and runs a full scan when it is inside
//! the configured buffer.

use alloy::primitives::U256;
use anyhow::{Context, Result};
use keeper_api::PriceOracle;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use crate::batch_executor::{BatchExecutor, PassReport};
use crate::config::KeeperConfig;
use crate::position::Position;
use crate::position_queue::PositionSet;
use crate::stats::KeeperStats;
use crate::u256_math::{apply_basis_points, price_ratio_bps, wad_to_f64};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scan_interval: Duration,
    /// Full scan when the top position is closer than this, in basis points.
    pub buffer_ratio_bps: i64,
    /// Full-scan pre-filter: skip positions whose liquidation price is more
    /// than this many basis points below the current price.
    pub scan_window_bps: u64,
    pub price_ttl: Duration,
}

impl SchedulerConfig {
    pub fn from_keeper(config: &KeeperConfig) -> Self {
        Self {
            scan_interval: config.scanner.scan_interval(),
            buffer_ratio_bps: config.scanner.buffer_ratio_bps(),
            scan_window_bps: config.scanner.scan_window_bps,
            price_ttl: config.scanner.price_ttl(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: U256,
    fetched_at: Instant,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub pending: PassReport,
    /// Distance of the top position from the current price, if there was one.
    pub price_ratio_bps: Option<i64>,
    /// Present when the buffer was breached.
    pub full_scan: Option<PassReport>,
}

pub struct LiquidationScheduler {
    positions: Arc<dyn PositionSet>,
    oracle: Arc<dyn PriceOracle>,
    executor: Arc<BatchExecutor>,
    stats: Arc<KeeperStats>,
    config: SchedulerConfig,
    price: Mutex<Option<CachedPrice>>,
}

impl LiquidationScheduler {
    pub fn new(
        positions: Arc<dyn PositionSet>,
        oracle: Arc<dyn PriceOracle>,
        executor: Arc<BatchExecutor>,
        stats: Arc<KeeperStats>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            positions,
            oracle,
            executor,
            stats,
            config,
            price: Mutex::new(None),
        }
    }

    /// Tick until `shutdown` flips. A failed tick is logged and the next one
    /// runs on schedule; a running tick always finishes before shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            buffer_ratio_bps = self.config.buffer_ratio_bps,
            scan_window_bps = self.config.scan_window_bps,
            "Liquidation scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Keeper tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Liquidation scheduler stopping");
                    break;
                }
            }
        }
    }

    #[instrument(skip(self), fields(tracked = self.positions.len(), pending = self.positions.pending_len()))]
    pub async fn tick(&self) -> Result<TickReport> {
        self.stats.record_tick();
        let mut report = TickReport::default();

        let pending = self.positions.all_pending();
        if !pending.is_empty() {
            debug!(count = pending.len(), "Probing positions with unknown price");
            report.pending = self.executor.check_and_liquidate(&pending).await;
        }

        let Some(top) = self.positions.top() else {
            return Ok(report);
        };
        let Some(top_price) = top.liquidation_price else {
            return Ok(report);
        };

        let current_price = self.current_price().await?;
        let ratio = price_ratio_bps(current_price, top_price)
            .context("oracle returned a zero price")?;
        report.price_ratio_bps = Some(ratio);

        if ratio >= self.config.buffer_ratio_bps {
            return Ok(report);
        }

        info!(
            current_price = wad_to_f64(current_price),
            top_token_id = top.token_id,
            top_liquidation_price = wad_to_f64(top_price),
            price_ratio_bps = ratio,
            buffer_ratio_bps = self.config.buffer_ratio_bps,
            "Buffer breached, running full scan"
        );
        self.stats.record_full_scan();

        let candidates = self.scan_candidates(current_price);
        report.full_scan = Some(self.executor.check_and_liquidate(&candidates).await);

        let stats = self.stats.snapshot();
        info!(
            ticks = stats.ticks,
            full_scans = stats.full_scans,
            eligibility_checks = stats.eligibility_checks,
            attempts = stats.attempts_launched,
            skipped = stats.skipped_in_flight,
            liquidated = stats.liquidated,
            rejected = stats.rejected,
            failed = stats.failed,
            "Keeper stats"
        );
        Ok(report)
    }

    /// Ordered positions near enough to the price and not already in flight.
    fn scan_candidates(&self, current_price: U256) -> Vec<Position> {
        let floor = apply_basis_points(current_price, self.config.scan_window_bps);
        let gate = self.executor.gate();
        self.positions
            .all()
            .into_iter()
            .filter(|p| !gate.contains(p.token_id))
            .filter(|p| p.liquidation_price.is_some_and(|price| price > floor))
            .collect()
    }

    /// Cached oracle price, refetched once older than the TTL.
    async fn current_price(&self) -> Result<U256> {
        let cached = *self.price.lock();
        if let Some(cached) = cached {
            if cached.fetched_at.elapsed() < self.config.price_ttl {
                return Ok(cached.price);
            }
        }

        let price = self
            .oracle
            .current_price()
            .await
            .context("oracle price fetch failed")?;
        *self.price.lock() = Some(CachedPrice {
            price,
            fetched_at: Instant::now(),
        });
        debug!(price = wad_to_f64(price), "Oracle price refreshed");
        Ok(price)
    }
}
