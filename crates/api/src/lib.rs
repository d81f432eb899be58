//! Off-chain price service clients.
//!
//! This crate provides:
//! - `PriceOracle`: the price source the keeper schedules against
//! - `PythClient`: Pyth Hermes implementation (latest price + update blobs)

mod oracle;
mod pyth;

pub use oracle::PriceOracle;
pub use pyth::{normalize_price, HermesUpdate, PythClient, PRICE_DECIMALS};
