//! Applies position lifecycle events to the queue and the store.

use anyhow::{Context, Result};
use keeper_chain::{LiquidationChain, PositionEvent, PositionEventKind, TokenId};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::position::Position;
use crate::position_queue::PositionSet;
use crate::store::PositionStore;

/// Single consumer of the event channel. Events are applied one at a time
/// in arrival order.
pub struct EventProcessor {
    chain: Arc<dyn LiquidationChain>,
    positions: Arc<dyn PositionSet>,
    store: Arc<dyn PositionStore>,
}

impl EventProcessor {
    pub fn new(chain: Arc<dyn LiquidationChain>, positions: Arc<dyn PositionSet>, store: Arc<dyn PositionStore>) -> Self {
        Self {
            chain,
            positions,
            store,
        }
    }

    /// Drain `rx` until it closes or `shutdown` flips.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<PositionEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("Event processor started");
        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else {
                        warn!("Event channel closed");
                        break;
                    };
                    if let Err(e) = self.handle(&event).await {
                        error!(event = event.event_type(), token_id = event.token_id, error = %e, "Failed to apply position event");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Event processor stopping");
                    break;
                }
            }
        }
    }

    pub async fn handle(&self, event: &PositionEvent) -> Result<()> {
        let token_id = event.token_id;
        debug!(event = event.event_type(), token_id, block = event.block_number, "Applying position event");

        match event.kind {
            PositionEventKind::Opened | PositionEventKind::Adjusted => {
                let position = self.lookup(token_id).await;
                self.positions.insert_or_update(position.clone());
                self.store
                    .save_or_update(token_id, position.liquidation_price)
                    .await
                    .with_context(|| format!("failed to persist position {token_id}"))?;
                info!(
                    event = event.event_type(),
                    token_id,
                    pending = position.is_pending(),
                    "Position tracked"
                );
            }
            PositionEventKind::Closed | PositionEventKind::Liquidated => {
                let was_tracked = self.positions.remove(token_id);
                self.store
                    .delete(token_id)
                    .await
                    .with_context(|| format!("failed to delete position {token_id}"))?;
                info!(event = event.event_type(), token_id, was_tracked, "Position removed");
            }
        }
        Ok(())
    }

    /// Best-effort price read. Failures and zero prices land in pending.
    async fn lookup(&self, token_id: TokenId) -> Position {
        match self.chain.liquidation_price(token_id).await {
            Ok(price) => Position::from_chain_price(token_id, price),
            Err(e) => {
                warn!(token_id, error = %e, "Liquidation price lookup failed, tracking as pending");
                Position::pending(token_id)
            }
        }
    }
}
