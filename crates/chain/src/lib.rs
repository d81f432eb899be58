//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for the leverage, liquidation and viewer contracts
//! - A read client for eligibility, liquidation prices, nonces and fee hints
//! - Transaction signing and sending with nonce pinning and confirmation timeout
//! - Gas strategy abstraction (Legacy + EIP-1559)
//! - A WebSocket listener for position lifecycle events

mod client;
mod contracts;
mod error;
mod event_listener;
pub mod gas;
mod provider;
mod signer;

use alloy::primitives::U256;

pub use client::{ChainClient, LiquidationChain};
pub use contracts::{encode_liquidate, event_signatures};
pub use error::{ChainError, ChainResult};
pub use event_listener::{parse_position_event, EventListener, PositionEvent, PositionEventKind};
pub use provider::{ContractAddresses, PositionSnapshot, ProviderManager};
pub use signer::{LiquidationRequest, NonceManager, TransactionSender, TransactionSenderBuilder};

/// Position NFT identifier.
pub type TokenId = u64;

/// Narrow an on-chain `uint256` token id.
pub fn token_id_from_u256(value: U256) -> ChainResult<TokenId> {
    u64::try_from(value).map_err(|_| ChainError::InvalidResponse(format!("token id {value} exceeds u64")))
}
