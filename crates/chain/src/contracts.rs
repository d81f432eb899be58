//! Contract bindings for the leverage and liquidation modules.
//!
//! This module provides type definitions and ABI helpers for interacting
//! with the leveraged-position contracts the keeper watches.

use alloy::primitives::{Bytes, B256, U256};
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};

use crate::TokenId;

// Define contract interfaces using sol! macro for ABI generation
sol! {
    /// Settlement summary attached to close and liquidation events
    #[derive(Debug)]
    struct PositionSummary {
        int256 profitLoss;
        int256 accruedFunding;
        int256 marginAfterSettlement;
    }

    /// Per-position view returned by the viewer contract
    #[derive(Debug)]
    struct LeveragePositionData {
        uint256 tokenId;
        uint256 entryPrice;
        uint256 marginDeposited;
        uint256 additionalSize;
        int256 marginAfterSettlement;
        uint256 liquidationPrice;
    }

    /// Liquidation module interface (subset used by the keeper)
    #[sol(rpc)]
    interface ILiquidationModule {
        event PositionLiquidated(uint256 tokenId, address liquidator, uint256 liquidationFee, uint256 closePrice, PositionSummary positionSummary);

        function canLiquidate(uint256 tokenId) external view returns (bool liquidatable);

        function liquidationPrice(uint256 tokenId) external view returns (uint256 liqPrice);

        function liquidate(uint256 tokenID, bytes[] calldata priceUpdateData) external payable;
    }

    /// Leverage module interface (position lifecycle events)
    #[sol(rpc)]
    interface ILeverageModule {
        event LeverageOpen(address account, uint256 tokenId, uint256 entryPrice);
        event LeverageAdjust(uint256 tokenId, uint256 averagePrice, uint256 adjustPrice);
        event LeverageClose(uint256 tokenId, uint256 closePrice, PositionSummary positionSummary);

        function tokenIdNext() external view returns (uint256);
    }

    /// Viewer contract interface (range queries for bootstrap)
    #[sol(rpc)]
    interface IViewer {
        function getPositionData(uint256 tokenIdFrom, uint256 tokenIdTo) external view returns (LeveragePositionData[] memory positionData);
    }
}

/// Encode `liquidate(uint256,bytes[])` calldata.
pub fn encode_liquidate(token_id: TokenId, price_update_data: Vec<Bytes>) -> Bytes {
    let call = ILiquidationModule::liquidateCall {
        tokenID: U256::from(token_id),
        priceUpdateData: price_update_data,
    };
    Bytes::from(call.abi_encode())
}

/// Event signature constants for log filtering.
pub mod event_signatures {
    use super::*;

    pub const LEVERAGE_OPEN: B256 = ILeverageModule::LeverageOpen::SIGNATURE_HASH;
    pub const LEVERAGE_ADJUST: B256 = ILeverageModule::LeverageAdjust::SIGNATURE_HASH;
    pub const LEVERAGE_CLOSE: B256 = ILeverageModule::LeverageClose::SIGNATURE_HASH;
    pub const POSITION_LIQUIDATED: B256 = ILiquidationModule::PositionLiquidated::SIGNATURE_HASH;

    /// All position lifecycle events the keeper subscribes to.
    pub fn position_signatures() -> Vec<B256> {
        vec![LEVERAGE_OPEN, LEVERAGE_ADJUST, LEVERAGE_CLOSE, POSITION_LIQUIDATED]
    }
}
