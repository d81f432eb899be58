//! Positions ordered by liquidation price, plus a side set of positions
//! whose price is not known yet.
//!
//! Every token id lives in exactly one of the two containers. All operations
//! take the lock once for their full duration, so the keeper tick and the
//! price refresh job never observe a half-applied move between containers.

use alloy::primitives::U256;
use keeper_chain::TokenId;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

use crate::position::Position;

/// Order key: price first, token id breaks ties.
type OrderKey = (U256, TokenId);

/// Ordered position container used by the schedulers.
pub trait PositionSet: Send + Sync {
    /// Place `position` in the ordered or pending container depending on
    /// whether its price is known, removing it from the other one.
    fn insert_or_update(&self, position: Position);

    /// Remove from whichever container holds it. Returns whether it was present.
    fn remove(&self, token_id: TokenId) -> bool;

    /// `insert_or_update` only if the token id is still held, checked and
    /// applied under one lock. Returns whether it was applied.
    fn update_if_tracked(&self, position: Position) -> bool;

    /// Position with the greatest liquidation price.
    fn top(&self) -> Option<Position>;

    /// Ordered positions, ascending by key.
    fn all(&self) -> Vec<Position>;

    fn all_pending(&self) -> Vec<Position>;

    fn by_token_id(&self, token_id: TokenId) -> Option<Position>;

    fn len(&self) -> usize;

    fn pending_len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0 && self.pending_len() == 0
    }
}

#[derive(Default)]
struct Inner {
    ordered: BTreeSet<OrderKey>,
    /// token id -> current key in `ordered`
    keys: HashMap<TokenId, OrderKey>,
    pending: HashMap<TokenId, Position>,
}

impl Inner {
    fn remove_ordered(&mut self, token_id: TokenId) -> bool {
        match self.keys.remove(&token_id) {
            Some(key) => self.ordered.remove(&key),
            None => false,
        }
    }

    fn is_tracked(&self, token_id: TokenId) -> bool {
        self.keys.contains_key(&token_id) || self.pending.contains_key(&token_id)
    }

    fn place(&mut self, position: Position) {
        let token_id = position.token_id;
        match position.liquidation_price {
            Some(price) => {
                self.pending.remove(&token_id);
                self.remove_ordered(token_id);
                let key = (price, token_id);
                self.ordered.insert(key);
                self.keys.insert(token_id, key);
            }
            None => {
                self.remove_ordered(token_id);
                self.pending.insert(token_id, position);
            }
        }
    }
}

/// B-tree backed `PositionSet`.
#[derive(Default)]
pub struct PositionQueue {
    inner: RwLock<Inner>,
}

impl PositionQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionSet for PositionQueue {
    fn insert_or_update(&self, position: Position) {
        self.inner.write().place(position);
    }

    fn update_if_tracked(&self, position: Position) -> bool {
        let mut inner = self.inner.write();
        if !inner.is_tracked(position.token_id) {
            return false;
        }
        inner.place(position);
        true
    }

    fn remove(&self, token_id: TokenId) -> bool {
        let mut inner = self.inner.write();
        let was_ordered = inner.remove_ordered(token_id);
        let was_pending = inner.pending.remove(&token_id).is_some();
        was_ordered || was_pending
    }

    fn top(&self) -> Option<Position> {
        self.inner
            .read()
            .ordered
            .last()
            .map(|&(price, token_id)| Position::new(token_id, price))
    }

    fn all(&self) -> Vec<Position> {
        self.inner
            .read()
            .ordered
            .iter()
            .map(|&(price, token_id)| Position::new(token_id, price))
            .collect()
    }

    fn all_pending(&self) -> Vec<Position> {
        self.inner.read().pending.values().cloned().collect()
    }

    fn by_token_id(&self, token_id: TokenId) -> Option<Position> {
        let inner = self.inner.read();
        if let Some(&(price, _)) = inner.keys.get(&token_id) {
            return Some(Position::new(token_id, price));
        }
        inner.pending.get(&token_id).cloned()
    }

    fn len(&self) -> usize {
        self.inner.read().ordered.len()
    }

    fn pending_len(&self) -> usize {
        self.inner.read().pending.len()
    }
}

impl std::fmt::Debug for PositionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PositionQueue")
            .field("ordered", &inner.ordered.len())
            .field("pending", &inner.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(token_id: TokenId, price: u64) -> Position {
        Position::new(token_id, U256::from(price))
    }

    fn top_price(queue: &PositionQueue) -> Option<U256> {
        queue.top().and_then(|p| p.liquidation_price)
    }

    #[test]
    fn test_update_if_tracked_never_resurrects() {
        let queue = PositionQueue::new();
        assert!(!queue.update_if_tracked(p(7, 1000)));
        assert!(queue.by_token_id(7).is_none());

        queue.insert_or_update(Position::pending(7));
        assert!(queue.update_if_tracked(p(7, 1200)));
        assert_eq!(queue.pending_len(), 0);
        assert_eq!(top_price(&queue), Some(U256::from(1200u64)));

        queue.remove(7);
        assert!(!queue.update_if_tracked(p(7, 1300)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_position() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));

        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.all().len(), 1);
        assert_eq!(top_price(&queue), Some(U256::from(1000u64)));
    }

    #[test]
    fn test_pending_does_not_affect_top() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(Position::pending(2));

        assert_eq!(queue.all_pending().len(), 1);
        assert_eq!(queue.all().len(), 1);
        assert_eq!(top_price(&queue), Some(U256::from(1000u64)));
    }

    #[test]
    fn test_known_price_becomes_pending() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(Position::pending(1));

        let pending = queue.all_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].token_id, 1);
        assert!(queue.all().is_empty());
        assert!(queue.top().is_none());
    }

    #[test]
    fn test_remove_top() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(p(2, 1002));
        queue.insert_or_update(p(3, 1003));
        assert!(queue.remove(3));

        assert_eq!(queue.all().len(), 2);
        assert_eq!(top_price(&queue), Some(U256::from(1002u64)));
    }

    #[test]
    fn test_replace_existing_price() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(p(2, 1002));
        queue.insert_or_update(p(2, 1005));

        assert_eq!(queue.all().len(), 2);
        assert_eq!(top_price(&queue), Some(U256::from(1005u64)));

        queue.insert_or_update(p(2, 998));
        assert_eq!(queue.all().len(), 2);
        assert_eq!(top_price(&queue), Some(U256::from(1000u64)));
    }

    #[test]
    fn test_remove_pending() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(p(2, 1002));
        queue.insert_or_update(Position::pending(3));
        assert!(queue.remove(3));

        assert_eq!(queue.pending_len(), 0);
        assert_eq!(queue.len(), 2);
        assert_eq!(top_price(&queue), Some(U256::from(1002u64)));
    }

    #[test]
    fn test_ordered_to_pending_update() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));
        queue.insert_or_update(p(2, 1002));
        queue.insert_or_update(Position::pending(3));
        queue.insert_or_update(Position::pending(2));

        assert_eq!(queue.pending_len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(top_price(&queue), Some(U256::from(1000u64)));
    }

    #[test]
    fn test_many_positions_top() {
        let queue = PositionQueue::new();
        for (id, price) in [(1, 1000), (2, 987), (3, 1005), (4, 1054), (5, 10010), (6, 105)] {
            queue.insert_or_update(p(id, price));
        }

        assert_eq!(queue.len(), 6);
        assert_eq!(queue.top().map(|p| p.token_id), Some(5));

        let top = queue.top().and_then(|p| p.liquidation_price).unwrap();
        assert!(queue.all().iter().all(|p| p.liquidation_price.unwrap() <= top));
    }

    #[test]
    fn test_equal_prices_kept_distinct() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 500));
        queue.insert_or_update(p(2, 500));
        assert_eq!(queue.len(), 2);

        assert!(queue.remove(1));
        assert_eq!(queue.top().map(|p| p.token_id), Some(2));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(1, 1000));

        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert!(!queue.remove(42));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_round_trip_between_containers() {
        let queue = PositionQueue::new();
        queue.insert_or_update(p(5, 1000));
        assert_eq!(queue.by_token_id(5), Some(p(5, 1000)));

        queue.insert_or_update(Position::pending(5));
        assert_eq!(queue.by_token_id(5), Some(Position::pending(5)));
        assert!(queue.top().is_none());
        assert_eq!(queue.len() + queue.pending_len(), 1);

        assert!(queue.by_token_id(6).is_none());
    }

    #[test]
    fn test_containers_stay_disjoint() {
        let queue = PositionQueue::new();
        // Deterministic pseudo-random sequence of inserts, pendings and removes.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        for _ in 0..2_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let token_id = state % 32;
            match (state >> 8) % 3 {
                0 => queue.insert_or_update(p(token_id, (state >> 16) % 50)),
                1 => queue.insert_or_update(Position::pending(token_id)),
                _ => {
                    queue.remove(token_id);
                }
            }

            let ordered: Vec<_> = queue.all().into_iter().map(|p| p.token_id).collect();
            let pending: Vec<_> = queue.all_pending().into_iter().map(|p| p.token_id).collect();
            for id in &ordered {
                assert!(!pending.contains(id), "token {id} in both containers");
            }
            let mut dedup = ordered.clone();
            dedup.sort_unstable();
            dedup.dedup();
            assert_eq!(dedup.len(), ordered.len());
        }
    }
}
