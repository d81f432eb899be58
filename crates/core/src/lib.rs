//! Keeper core logic.
//!
//! This crate provides the position tracking and liquidation scheduling engine:
//! - Positions ordered by liquidation price, with a pending side set
//! - Per-position in-flight guard
//! - Chunked eligibility checks and nonce-pinned liquidation batches
//! - The keeper tick and the slower liquidation price refresh
//! - Event application and startup restore
//!
//! Chain access, the price oracle and persistence are injected as traits.

mod batch_executor;
mod bootstrap;
pub mod config;
mod dedup;
mod events;
mod position;
mod position_queue;
mod price_refresh;
mod scheduler;
mod stats;
mod store;
pub mod u256_math;

#[cfg(test)]
mod test_utils;

pub use batch_executor::{AttemptOutcome, BatchExecutor, ExecutorConfig, PassReport};
pub use bootstrap::{BootstrapReport, BootstrapSettings, Bootstrapper};
pub use config::{DeploymentConfig, KeeperConfig};
pub use dedup::{DedupGate, InFlightGuard};
pub use events::EventProcessor;
pub use position::Position;
pub use position_queue::{PositionQueue, PositionSet};
pub use price_refresh::{PriceRefreshScheduler, RefreshReport, RefreshSettings};
pub use scheduler::{LiquidationScheduler, SchedulerConfig, TickReport};
pub use stats::{KeeperStats, StatsSnapshot};
pub use store::{JsonFileStore, MemoryStore, PositionStore};
