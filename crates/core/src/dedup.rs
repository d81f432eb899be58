//! Per-position guard against concurrent liquidation attempts.

use dashmap::DashSet;
use keeper_chain::TokenId;
use std::sync::Arc;

/// Set of token ids with a liquidation attempt in flight.
///
/// Cloning shares the underlying set.
#[derive(Debug, Clone, Default)]
pub struct DedupGate {
    in_flight: Arc<DashSet<TokenId>>,
}

impl DedupGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `token_id`. `None` if another attempt already holds it.
    pub fn try_acquire(&self, token_id: TokenId) -> Option<InFlightGuard> {
        if self.in_flight.insert(token_id) {
            Some(InFlightGuard {
                token_id,
                in_flight: Arc::clone(&self.in_flight),
            })
        } else {
            None
        }
    }

    pub fn contains(&self, token_id: TokenId) -> bool {
        self.in_flight.contains(&token_id)
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }
}

/// Releases the token id on drop, whatever way the attempt ends.
#[derive(Debug)]
pub struct InFlightGuard {
    token_id: TokenId,
    in_flight: Arc<DashSet<TokenId>>,
}

impl InFlightGuard {
    pub fn token_id(&self) -> TokenId {
        self.token_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.token_id);
    }
}
