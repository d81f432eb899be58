//! Keeper counters.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct KeeperStats {
    ticks: AtomicU64,
    full_scans: AtomicU64,
    eligibility_checks: AtomicU64,
    attempts_launched: AtomicU64,
    skipped_in_flight: AtomicU64,
    liquidated: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    refreshes: AtomicU64,
}

/// Point-in-time copy of `KeeperStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub full_scans: u64,
    pub eligibility_checks: u64,
    pub attempts_launched: u64,
    pub skipped_in_flight: u64,
    pub liquidated: u64,
    pub rejected: u64,
    pub failed: u64,
    pub refreshes: u64,
}

impl KeeperStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_full_scan(&self) {
        self.full_scans.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_eligibility_checks(&self, n: usize) {
        self.eligibility_checks.fetch_add(n as u64, Ordering::Relaxed);
    }
    pub fn record_attempt(&self) {
        self.attempts_launched.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_skipped(&self) {
        self.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_liquidated(&self) {
        self.liquidated.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            full_scans: self.full_scans.load(Ordering::Relaxed),
            eligibility_checks: self.eligibility_checks.load(Ordering::Relaxed),
            attempts_launched: self.attempts_launched.load(Ordering::Relaxed),
            skipped_in_flight: self.skipped_in_flight.load(Ordering::Relaxed),
            liquidated: self.liquidated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
        }
    }
}
