//! WebSocket event listener for position lifecycle events.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Filter, Log};
use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::contracts::{event_signatures, ILeverageModule, ILiquidationModule};
use crate::{token_id_from_u256, ChainError, ChainResult, TokenId};

/// Kind of lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionEventKind {
    Opened,
    Adjusted,
    Closed,
    Liquidated,
}

/// Position lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionEvent {
    pub kind: PositionEventKind,
    pub token_id: TokenId,
    pub block_number: u64,
    pub tx_hash: B256,
}

impl PositionEvent {
    pub fn new(kind: PositionEventKind, token_id: TokenId) -> Self {
        Self {
            kind,
            token_id,
            block_number: 0,
            tx_hash: B256::ZERO,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            PositionEventKind::Opened => "LeverageOpen",
            PositionEventKind::Adjusted => "LeverageAdjust",
            PositionEventKind::Closed => "LeverageClose",
            PositionEventKind::Liquidated => "PositionLiquidated",
        }
    }
}

/// WebSocket event listener for real-time events.
pub struct EventListener {
    /// WebSocket URL
    ws_url: String,
    leverage_module: Address,
    liquidation_module: Address,
}

impl EventListener {
    pub fn new(ws_url: impl Into<String>, leverage_module: Address, liquidation_module: Address) -> Self {
        Self {
            ws_url: ws_url.into(),
            leverage_module,
            liquidation_module,
        }
    }

    /// Subscribe to open/adjust/close/liquidated logs.
    pub async fn subscribe(&self) -> ChainResult<Pin<Box<dyn Stream<Item = PositionEvent> + Send>>> {
        info!(
            ws_url = %self.ws_url,
            leverage_module = %self.leverage_module,
            liquidation_module = %self.liquidation_module,
            "Subscribing to position events"
        );

        let ws = WsConnect::new(&self.ws_url);
        let provider = ProviderBuilder::new()
            .on_ws(ws)
            .await
            .map_err(ChainError::transport)?;
        info!("WebSocket connected for position events");

        let filter = Filter::new()
            .address(vec![self.leverage_module, self.liquidation_module])
            .event_signature(event_signatures::position_signatures());

        let sub = provider
            .subscribe_logs(&filter)
            .await
            .map_err(ChainError::transport)?;
        let inner_stream = sub.into_stream();

        // The provider must be kept in the stream's state to prevent WebSocket from closing
        let event_stream = futures::stream::unfold(
            (provider, inner_stream),
            |(_provider, mut stream)| async move {
                loop {
                    match stream.next().await {
                        Some(log) => {
                            if let Some(event) = parse_position_event(&log) {
                                return Some((event, (_provider, stream)));
                            }
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(Box::pin(event_stream))
    }

    /// Subscribe and push every event into `tx` in arrival order.
    ///
    /// Returns when the subscription ends or the receiver is dropped; the
    /// caller decides whether to reconnect.
    pub async fn forward(&self, tx: mpsc::Sender<PositionEvent>) -> ChainResult<()> {
        let mut stream = self.subscribe().await?;

        while let Some(event) = stream.next().await {
            debug!(
                event = event.event_type(),
                token_id = event.token_id,
                block = event.block_number,
                "Position event received"
            );
            if tx.send(event).await.is_err() {
                info!("Event receiver dropped, stopping listener");
                return Ok(());
            }
        }

        warn!("Position event subscription ended");
        Ok(())
    }
}

/// Decode a lifecycle log. Unknown or malformed logs yield `None`.
pub fn parse_position_event(log: &Log) -> Option<PositionEvent> {
    let sig = *log.topics().first()?;
    let block_number = log.block_number.unwrap_or(0);
    let tx_hash = log.transaction_hash.unwrap_or_default();

    let decoded = if sig == event_signatures::LEVERAGE_OPEN {
        log.log_decode::<ILeverageModule::LeverageOpen>()
            .map(|l| (PositionEventKind::Opened, l.inner.data.tokenId))
    } else if sig == event_signatures::LEVERAGE_ADJUST {
        log.log_decode::<ILeverageModule::LeverageAdjust>()
            .map(|l| (PositionEventKind::Adjusted, l.inner.data.tokenId))
    } else if sig == event_signatures::LEVERAGE_CLOSE {
        log.log_decode::<ILeverageModule::LeverageClose>()
            .map(|l| (PositionEventKind::Closed, l.inner.data.tokenId))
    } else if sig == event_signatures::POSITION_LIQUIDATED {
        log.log_decode::<ILiquidationModule::PositionLiquidated>()
            .map(|l| (PositionEventKind::Liquidated, l.inner.data.tokenId))
    } else {
        return None;
    };

    let (kind, raw_id): (PositionEventKind, U256) = match decoded {
        Ok(d) => d,
        Err(e) => {
            warn!(tx_hash = %tx_hash, error = %e, "Failed to decode position event");
            return None;
        }
    };

    match token_id_from_u256(raw_id) {
        Ok(token_id) => Some(PositionEvent {
            kind,
            token_id,
            block_number,
            tx_hash,
        }),
        Err(e) => {
            warn!(tx_hash = %tx_hash, error = %e, "Position event token id out of range");
            None
        }
    }
}
