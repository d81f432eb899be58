//! Chain error types.

use alloy::primitives::B256;
use thiserror::Error;

use crate::TokenId;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Gas estimation reverted: the position is not liquidatable right now.
    #[error("liquidation simulation rejected for token {token_id}: {reason}")]
    SimulationRejected { token_id: TokenId, reason: String },

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("transaction {tx_hash} not confirmed within {timeout_secs}s")]
    ConfirmationTimeout { tx_hash: B256, timeout_secs: u64 },

    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChainError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Whether the chain refused the liquidation during simulation.
    pub fn is_simulation_rejection(&self) -> bool {
        matches!(self, Self::SimulationRejected { .. })
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
