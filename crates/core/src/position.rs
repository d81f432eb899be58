//! Tracked position model.

use alloy::primitives::U256;
use keeper_chain::TokenId;
use serde::{Deserialize, Serialize};

/// A leveraged position the keeper watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub token_id: TokenId,
    /// `None` until a price lookup succeeds.
    pub liquidation_price: Option<U256>,
}

impl Position {
    pub fn new(token_id: TokenId, liquidation_price: U256) -> Self {
        Self {
            token_id,
            liquidation_price: Some(liquidation_price),
        }
    }

    pub fn pending(token_id: TokenId) -> Self {
        Self {
            token_id,
            liquidation_price: None,
        }
    }

    /// Position from a raw chain read where zero means "unknown".
    pub fn from_chain_price(token_id: TokenId, price: U256) -> Self {
        if price.is_zero() {
            Self::pending(token_id)
        } else {
            Self::new(token_id, price)
        }
    }

    pub fn is_pending(&self) -> bool {
        self.liquidation_price.is_none()
    }
}
