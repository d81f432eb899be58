//! Check-and-liquidate pipeline.
//!
//! Candidates are checked for eligibility in RPC-sized chunks. Eligible
//! positions are liquidated in smaller sub-chunks with nonces assigned
//! locally from one fresh chain read per chunk.

use alloy::primitives::B256;
use anyhow::{Context, Result};
use backon::{ConstantBuilder, Retryable};
use futures::future::join_all;
use keeper_api::PriceOracle;
use keeper_chain::{ChainError, LiquidationChain, LiquidationRequest, NonceManager, TokenId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use crate::config::KeeperConfig;
use crate::dedup::{DedupGate, InFlightGuard};
use crate::position::Position;
use crate::position_queue::PositionSet;
use crate::stats::KeeperStats;
use crate::store::PositionStore;

/// Batching and retry knobs for one executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub rpc_batch_size: usize,
    pub liquidation_batch_size: usize,
    /// Pause after each liquidation sub-chunk.
    pub batch_wait: Duration,
    pub fee_retry_attempts: u32,
    pub fee_retry_delay: Duration,
}

impl ExecutorConfig {
    pub fn from_keeper(config: &KeeperConfig) -> Self {
        Self {
            rpc_batch_size: config.batch.max_batch_size_for_rpc_batch_request,
            liquidation_batch_size: config.batch.max_batch_size_for_liquidation_queue,
            batch_wait: config.batch.batch_wait(),
            fee_retry_attempts: config.gas.fee_retry_attempts,
            fee_retry_delay: config.gas.fee_retry_delay(),
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from_keeper(&KeeperConfig::default())
    }
}

/// How a single liquidation attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Liquidated { tx_hash: B256 },
    /// The chain simulation refused the call; the position is not eligible right now.
    Rejected,
    Failed,
}

/// Tally of one `check_and_liquidate` pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub checked: usize,
    pub eligible: usize,
    pub launched: usize,
    pub skipped_in_flight: usize,
    pub liquidated: usize,
    pub rejected: usize,
    pub failed: usize,
    /// Chunks abandoned because the eligibility or nonce read failed.
    pub failed_chunks: usize,
}

impl PassReport {
    fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Liquidated { .. } => self.liquidated += 1,
            AttemptOutcome::Rejected => self.rejected += 1,
            AttemptOutcome::Failed => self.failed += 1,
        }
    }
}

/// Runs eligibility checks and liquidation attempts against the chain.
pub struct BatchExecutor {
    chain: Arc<dyn LiquidationChain>,
    oracle: Arc<dyn PriceOracle>,
    positions: Arc<dyn PositionSet>,
    store: Arc<dyn PositionStore>,
    gate: DedupGate,
    stats: Arc<KeeperStats>,
    config: ExecutorConfig,
}

impl BatchExecutor {
    pub fn new(
        chain: Arc<dyn LiquidationChain>,
        oracle: Arc<dyn PriceOracle>,
        positions: Arc<dyn PositionSet>,
        store: Arc<dyn PositionStore>,
        gate: DedupGate,
        stats: Arc<KeeperStats>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            chain,
            oracle,
            positions,
            store,
            gate,
            stats,
            config,
        }
    }

    pub fn gate(&self) -> &DedupGate {
        &self.gate
    }

    /// Check `candidates` and liquidate the eligible ones.
    ///
    /// A failed chunk is logged and skipped; the remaining chunks still run.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn check_and_liquidate(&self, candidates: &[Position]) -> PassReport {
        let mut report = PassReport::default();
        if candidates.is_empty() {
            return report;
        }

        let ids: Vec<TokenId> = candidates.iter().map(|p| p.token_id).collect();
        for chunk in ids.chunks(self.config.rpc_batch_size.max(1)) {
            if let Err(e) = self.process_chunk(chunk, &mut report).await {
                report.failed_chunks += 1;
                error!(chunk_len = chunk.len(), first_token_id = chunk[0], error = %e, "Liquidation chunk failed");
            }
        }

        if report.launched > 0 || report.failed_chunks > 0 {
            info!(
                checked = report.checked,
                eligible = report.eligible,
                launched = report.launched,
                skipped = report.skipped_in_flight,
                liquidated = report.liquidated,
                rejected = report.rejected,
                failed = report.failed,
                failed_chunks = report.failed_chunks,
                "Liquidation pass finished"
            );
        }
        report
    }

    async fn process_chunk(&self, chunk: &[TokenId], report: &mut PassReport) -> Result<()> {
        let results = self
            .chain
            .can_liquidate_batch(chunk)
            .await
            .context("eligibility check failed")?;
        report.checked += chunk.len();
        self.stats.record_eligibility_checks(chunk.len());

        let eligible: Vec<TokenId> = results
            .into_iter()
            .filter_map(|(id, liquidatable)| liquidatable.then_some(id))
            .collect();
        if eligible.is_empty() {
            return Ok(());
        }
        report.eligible += eligible.len();
        debug!(eligible = ?eligible, "Eligible positions found");

        let nonce = NonceManager::new(self.chain.current_nonce().await.context("nonce read failed")?);

        for sub_chunk in eligible.chunks(self.config.liquidation_batch_size.max(1)) {
            let mut attempts = Vec::with_capacity(sub_chunk.len());
            for &token_id in sub_chunk {
                let Some(guard) = self.gate.try_acquire(token_id) else {
                    debug!(token_id, "Liquidation already in flight, skipping");
                    report.skipped_in_flight += 1;
                    self.stats.record_skipped();
                    continue;
                };
                let assigned = nonce.next();
                report.launched += 1;
                self.stats.record_attempt();
                attempts.push(self.attempt(guard, assigned));
            }

            for outcome in join_all(attempts).await {
                report.record(&outcome);
            }

            tokio::time::sleep(self.config.batch_wait).await;
        }
        Ok(())
    }

    /// One liquidation. Never returns an error; the guard is released on return.
    #[instrument(skip(self, guard), fields(token_id = guard.token_id()))]
    async fn attempt(&self, guard: InFlightGuard, nonce: u64) -> AttemptOutcome {
        let token_id = guard.token_id();
        let outcome = match self.submit(token_id, nonce).await {
            Ok(tx_hash) => {
                self.positions.remove(token_id);
                if let Err(e) = self.store.delete(token_id).await {
                    warn!(token_id, error = %e, "Failed to delete liquidated position from store");
                }
                self.stats.record_liquidated();
                info!(token_id, nonce, tx_hash = %tx_hash, "Position liquidated");
                AttemptOutcome::Liquidated { tx_hash }
            }
            Err(e) if is_simulation_rejection(&e) => {
                self.stats.record_rejected();
                warn!(token_id, nonce, error = %e, "Liquidation rejected by simulation");
                AttemptOutcome::Rejected
            }
            Err(e) => {
                self.stats.record_failed();
                error!(token_id, nonce, error = %e, "Liquidation attempt failed");
                AttemptOutcome::Failed
            }
        };
        drop(guard);
        outcome
    }

    async fn submit(&self, token_id: TokenId, nonce: u64) -> Result<B256> {
        let price_update_data = self
            .oracle
            .price_update_payload()
            .await
            .context("price update payload unavailable")?;

        let retry_policy = ConstantBuilder::default()
            .with_delay(self.config.fee_retry_delay)
            .with_max_times(self.config.fee_retry_attempts.saturating_sub(1) as usize);
        let priority_fee = (|| self.chain.priority_fee_hint())
            .retry(retry_policy)
            .notify(|err, dur| {
                warn!(token_id, error = %err, retry_in_ms = dur.as_millis() as u64, "Priority fee hint failed, retrying");
            })
            .await
            .context("priority fee hint unavailable")?;

        let tx_hash = self
            .chain
            .submit_liquidation(LiquidationRequest {
                token_id,
                price_update_data,
                nonce,
                priority_fee,
            })
            .await?;
        Ok(tx_hash)
    }
}

fn is_simulation_rejection(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ChainError>()
        .is_some_and(ChainError::is_simulation_rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position_queue::PositionQueue;
    use crate::store::MemoryStore;
    use crate::test_utils::{MockChain, MockOracle};
    use alloy::primitives::U256;
    use std::sync::atomic::Ordering;

    struct Harness {
        chain: Arc<MockChain>,
        queue: Arc<PositionQueue>,
        store: Arc<MemoryStore>,
        stats: Arc<KeeperStats>,
        executor: Arc<BatchExecutor>,
    }

    fn harness(chain: MockChain, config: ExecutorConfig) -> Harness {
        let chain = Arc::new(chain);
        let queue = Arc::new(PositionQueue::new());
        let store = Arc::new(MemoryStore::new());
        let stats = Arc::new(KeeperStats::new());
        let executor = Arc::new(BatchExecutor::new(
            chain.clone(),
            Arc::new(MockOracle::with_price(1000)),
            queue.clone(),
            store.clone(),
            DedupGate::new(),
            stats.clone(),
            config,
        ));
        Harness {
            chain,
            queue,
            store,
            stats,
            executor,
        }
    }

    fn test_config() -> ExecutorConfig {
        ExecutorConfig {
            rpc_batch_size: 10,
            liquidation_batch_size: 5,
            batch_wait: Duration::from_millis(100),
            fee_retry_attempts: 3,
            fee_retry_delay: Duration::from_millis(500),
        }
    }

    fn priced(ids: &[TokenId]) -> Vec<Position> {
        ids.iter().map(|&id| Position::new(id, U256::from(1000u64))).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_eligible_position_is_liquidated_and_removed() {
        let h = harness(MockChain::new().with_eligible(&[1]).with_nonce(7), test_config());
        h.queue.insert_or_update(Position::new(1, U256::from(1000u64)));
        h.store.save_or_update(1, Some(U256::from(1000u64))).await.unwrap();
        h.queue.insert_or_update(Position::new(2, U256::from(900u64)));

        let report = h.executor.check_and_liquidate(&priced(&[1, 2])).await;

        assert_eq!(report.checked, 2);
        assert_eq!(report.eligible, 1);
        assert_eq!(report.liquidated, 1);
        assert!(h.queue.by_token_id(1).is_none());
        assert!(h.queue.by_token_id(2).is_some());
        assert!(h.store.get(1).is_none());
        assert_eq!(*h.chain.submitted.lock(), vec![(1, 7)]);
        assert!(h.executor.gate().is_empty());
        assert_eq!(h.stats.snapshot().liquidated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidates_are_checked_in_rpc_sized_chunks() {
        let config = ExecutorConfig {
            rpc_batch_size: 2,
            ..test_config()
        };
        let h = harness(MockChain::new(), config);

        let report = h.executor.check_and_liquidate(&priced(&[1, 2, 3, 4, 5])).await;

        assert_eq!(report.checked, 5);
        assert_eq!(*h.chain.eligibility_calls.lock(), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(h.chain.submit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonces_follow_launch_order_not_completion_order() {
        let h = harness(MockChain::new().with_eligible(&[3, 9, 2]).with_nonce(40), test_config());
        {
            let mut delays = h.chain.submit_delays.lock();
            delays.insert(3, Duration::from_millis(300));
            delays.insert(9, Duration::from_millis(100));
            delays.insert(2, Duration::from_millis(200));
        }

        let report = h.executor.check_and_liquidate(&priced(&[3, 9, 2])).await;

        assert_eq!(report.liquidated, 3);
        assert_eq!(*h.chain.submitted.lock(), vec![(3, 40), (9, 41), (2, 42)]);
        assert_eq!(*h.chain.confirmed.lock(), vec![(9, 41), (2, 42), (3, 40)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_chunks_run_one_after_another() {
        let config = ExecutorConfig {
            liquidation_batch_size: 2,
            ..test_config()
        };
        let h = harness(MockChain::new().with_eligible(&[1, 2, 3, 4, 5]).with_nonce(40), config);
        {
            let mut delays = h.chain.submit_delays.lock();
            delays.insert(1, Duration::from_millis(300));
            delays.insert(2, Duration::from_millis(100));
            delays.insert(3, Duration::from_millis(50));
            delays.insert(4, Duration::from_millis(80));
            delays.insert(5, Duration::from_millis(10));
        }
        let started = tokio::time::Instant::now();

        let report = h.executor.check_and_liquidate(&priced(&[1, 2, 3, 4, 5])).await;

        assert_eq!(report.liquidated, 5);
        assert_eq!(
            *h.chain.submitted.lock(),
            vec![(1, 40), (2, 41), (3, 42), (4, 43), (5, 44)]
        );
        // Token 3 finishes faster than token 1 but is only launched once the
        // whole first sub-chunk has settled.
        assert_eq!(
            *h.chain.confirmed.lock(),
            vec![(2, 41), (1, 40), (3, 42), (4, 43), (5, 44)]
        );
        // Slowest of each sub-chunk plus one batch wait after each.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300 + 80 + 10 + 3 * 100), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(800), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_is_refetched_per_chunk() {
        let config = ExecutorConfig {
            rpc_batch_size: 2,
            ..test_config()
        };
        let h = harness(MockChain::new().with_eligible(&[1, 2, 3]).with_nonce(10), config);
        // A rejected transaction never lands, so the chain nonce only advances once.
        h.chain.rejected.lock().insert(2);

        h.executor.check_and_liquidate(&priced(&[1, 2, 3])).await;

        assert_eq!(*h.chain.submitted.lock(), vec![(1, 10), (2, 11), (3, 11)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_position_is_skipped_by_concurrent_pass() {
        let h = harness(MockChain::new().with_eligible(&[7]), test_config());
        h.chain.submit_delays.lock().insert(7, Duration::from_secs(10));
        let candidates = priced(&[7]);

        let (first, second) = tokio::join!(
            h.executor.check_and_liquidate(&candidates),
            h.executor.check_and_liquidate(&candidates)
        );

        assert_eq!(first.launched + second.launched, 1);
        assert_eq!(first.skipped_in_flight + second.skipped_in_flight, 1);
        assert_eq!(h.chain.submit_count(), 1);
        assert!(h.executor.gate().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_position_does_not_consume_nonce() {
        let h = harness(MockChain::new().with_eligible(&[4, 5]).with_nonce(0), test_config());
        let held = h.executor.gate().try_acquire(4).unwrap();

        let report = h.executor.check_and_liquidate(&priced(&[4, 5])).await;
        drop(held);

        assert_eq!(report.skipped_in_flight, 1);
        assert_eq!(*h.chain.submitted.lock(), vec![(5, 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fee_hint_exhaustion_fails_without_submitting() {
        let h = harness(MockChain::new().with_eligible(&[1]), test_config());
        h.chain.fee_failures.store(u32::MAX, Ordering::SeqCst);
        h.queue.insert_or_update(Position::new(1, U256::from(1000u64)));

        let report = h.executor.check_and_liquidate(&priced(&[1])).await;

        assert_eq!(report.failed, 1);
        assert_eq!(h.chain.fee_calls.load(Ordering::SeqCst), 3);
        assert_eq!(h.chain.submit_count(), 0);
        assert!(h.queue.by_token_id(1).is_some());
        assert!(h.executor.gate().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_price_payload_fails_attempt() {
        let chain = Arc::new(MockChain::new().with_eligible(&[1]));
        let oracle = Arc::new(MockOracle::with_price(1000));
        oracle.fail_payload.store(true, Ordering::SeqCst);
        let executor = BatchExecutor::new(
            chain.clone(),
            oracle,
            Arc::new(PositionQueue::new()),
            Arc::new(MemoryStore::new()),
            DedupGate::new(),
            Arc::new(KeeperStats::new()),
            test_config(),
        );

        let report = executor.check_and_liquidate(&priced(&[1])).await;

        assert_eq!(report.failed, 1);
        assert_eq!(chain.submit_count(), 0);
        assert!(executor.gate().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fee_failure_is_retried() {
        let h = harness(MockChain::new().with_eligible(&[1]), test_config());
        h.chain.fee_failures.store(2, Ordering::SeqCst);

        let report = h.executor.check_and_liquidate(&priced(&[1])).await;

        assert_eq!(report.liquidated, 1);
        assert_eq!(h.chain.fee_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulation_rejection_is_isolated_and_released() {
        let h = harness(MockChain::new().with_eligible(&[1, 2]), test_config());
        h.chain.rejected.lock().insert(1);
        h.queue.insert_or_update(Position::new(1, U256::from(1000u64)));
        h.queue.insert_or_update(Position::new(2, U256::from(1000u64)));

        let report = h.executor.check_and_liquidate(&priced(&[1, 2])).await;

        assert_eq!(report.rejected, 1);
        assert_eq!(report.liquidated, 1);
        assert_eq!(h.chain.submit_count(), 2);
        assert!(h.queue.by_token_id(1).is_some());
        assert!(h.queue.by_token_id(2).is_none());
        assert!(h.executor.gate().is_empty());
        assert_eq!(h.stats.snapshot().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_eligibility_chunk_does_not_abort_pass() {
        let h = harness(MockChain::new().with_eligible(&[1]), test_config());
        h.chain.fail_eligibility.store(true, Ordering::SeqCst);

        let report = h.executor.check_and_liquidate(&priced(&[1])).await;

        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.checked, 0);
        assert_eq!(h.chain.submit_count(), 0);
    }

    #[test]
    fn test_rejection_classification_survives_context() {
        let err = anyhow::Error::new(ChainError::SimulationRejected {
            token_id: 1,
            reason: "reverted".into(),
        })
        .context("submit failed");
        assert!(is_simulation_rejection(&err));

        let err = anyhow::Error::new(ChainError::Transport("reset".into()));
        assert!(!is_simulation_rejection(&err));
    }
}
