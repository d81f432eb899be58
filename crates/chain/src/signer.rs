//! Transaction signer and sender for liquidations.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! The sender never picks its own nonce: the caller pins one per transaction
//! so concurrently submitted liquidations from one pass cannot collide.

use crate::contracts::encode_liquidate;
use crate::gas::{GasStrategy, LegacyGasStrategy};
use crate::{ChainError, ChainResult, TokenId};
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::TransportError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Local nonce counter seeded from a fresh chain read.
pub struct NonceManager {
    current: AtomicU64,
}

impl NonceManager {
    /// Create new nonce manager with initial value from chain.
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }
}

/// Everything needed to submit one liquidation.
#[derive(Debug, Clone)]
pub struct LiquidationRequest {
    pub token_id: TokenId,
    /// Oracle price-update blobs forwarded to `liquidate`.
    pub price_update_data: Vec<Bytes>,
    pub nonce: u64,
    /// Priority-fee hint in wei.
    pub priority_fee: u128,
}

/// Default extra gas on top of the estimate, in percent.
const DEFAULT_GAS_LIMIT_BUFFER_PCT: u64 = 40;
const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Builder for TransactionSender with flexible configuration.
pub struct TransactionSenderBuilder {
    rpc_url: String,
    chain_id: u64,
    liquidation_module: Address,
    gas_strategy: Option<Box<dyn GasStrategy>>,
    gas_limit_buffer_pct: u64,
    price_update_fee: U256,
    confirmation_timeout: Duration,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64, liquidation_module: Address) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            liquidation_module,
            gas_strategy: None,
            gas_limit_buffer_pct: DEFAULT_GAS_LIMIT_BUFFER_PCT,
            price_update_fee: U256::from(1u64),
            confirmation_timeout: DEFAULT_CONFIRMATION_TIMEOUT,
        }
    }

    /// Set the gas strategy.
    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    pub fn gas_limit_buffer_pct(mut self, pct: u64) -> Self {
        self.gas_limit_buffer_pct = pct;
        self
    }

    /// Value attached to `liquidate` to pay the oracle update fee.
    pub fn price_update_fee(mut self, wei: U256) -> Self {
        self.price_update_fee = wei;
        self
    }

    pub fn confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Build the TransactionSender.
    pub fn build(self, private_key: &str) -> ChainResult<TransactionSender> {
        // Parse private key (with or without 0x prefix)
        let key_str = private_key.trim_start_matches("0x");
        let signer: PrivateKeySigner = key_str
            .parse()
            .map_err(|e| ChainError::Signer(format!("invalid private key: {e}")))?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let gas_strategy = self
            .gas_strategy
            .unwrap_or_else(|| Box::new(LegacyGasStrategy::new(50_000_000_000)));

        info!(
            address = %address,
            chain_id = self.chain_id,
            liquidation_module = %self.liquidation_module,
            gas_strategy = gas_strategy.strategy_name(),
            gas_limit_buffer_pct = self.gas_limit_buffer_pct,
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            rpc_url: self.rpc_url,
            wallet,
            address,
            chain_id: self.chain_id,
            liquidation_module: self.liquidation_module,
            gas_strategy,
            gas_limit_buffer_pct: self.gas_limit_buffer_pct,
            price_update_fee: self.price_update_fee,
            confirmation_timeout: self.confirmation_timeout,
        })
    }
}

/// Signs and submits liquidation transactions.
pub struct TransactionSender {
    rpc_url: String,
    wallet: EthereumWallet,
    /// Signer address
    pub address: Address,
    chain_id: u64,
    liquidation_module: Address,
    gas_strategy: Box<dyn GasStrategy>,
    gas_limit_buffer_pct: u64,
    price_update_fee: U256,
    confirmation_timeout: Duration,
}

impl TransactionSender {
    /// Simulate, price, sign, submit and confirm a liquidation.
    ///
    /// A reverting gas estimate surfaces as `ChainError::SimulationRejected`.
    pub async fn send_liquidation(&self, request: &LiquidationRequest) -> ChainResult<B256> {
        let total_start = Instant::now();
        let token_id = request.token_id;

        let url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Config(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(url);

        let calldata = encode_liquidate(token_id, request.price_update_data.clone());
        let tx = TransactionRequest::default()
            .with_from(self.address)
            .with_to(self.liquidation_module)
            .with_input(calldata)
            .with_value(self.price_update_fee);

        let estimate = provider
            .estimate_gas(tx.clone())
            .await
            .map_err(|e| classify_estimate_error(token_id, e))?;
        let gas_limit = apply_gas_buffer(estimate, self.gas_limit_buffer_pct);

        let gas_params = self
            .gas_strategy
            .fetch_params(&self.rpc_url, request.priority_fee)
            .await?;

        let mut tx = tx
            .with_nonce(request.nonce)
            .with_gas_limit(gas_limit)
            .with_chain_id(self.chain_id);
        self.gas_strategy.apply_gas(&mut tx, &gas_params);

        info!(
            token_id = token_id,
            nonce = request.nonce,
            gas_estimate = estimate,
            gas_limit = gas_limit,
            gas_strategy = self.gas_strategy.strategy_name(),
            gas_price_gwei = gas_params.effective_gas_price() / 1_000_000_000,
            "Sending liquidation"
        );

        let pending = provider
            .send_transaction(tx)
            .await
            .map_err(ChainError::transport)?;
        let tx_hash = *pending.tx_hash();
        debug!(token_id = token_id, tx_hash = %tx_hash, "Liquidation submitted, waiting for confirmation");

        let receipt = match tokio::time::timeout(self.confirmation_timeout, pending.get_receipt()).await {
            Ok(receipt) => receipt.map_err(ChainError::transport)?,
            Err(_) => {
                return Err(ChainError::ConfirmationTimeout {
                    tx_hash,
                    timeout_secs: self.confirmation_timeout.as_secs(),
                })
            }
        };

        if receipt.status() {
            info!(
                token_id = token_id,
                tx_hash = %tx_hash,
                block = receipt.block_number.unwrap_or(0),
                gas_used = receipt.gas_used,
                total_ms = total_start.elapsed().as_millis(),
                "Liquidation confirmed"
            );
            Ok(tx_hash)
        } else {
            warn!(
                token_id = token_id,
                tx_hash = %tx_hash,
                total_ms = total_start.elapsed().as_millis(),
                "Liquidation reverted"
            );
            Err(ChainError::Reverted { tx_hash })
        }
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("liquidation_module", &self.liquidation_module)
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}

fn apply_gas_buffer(estimate: u64, buffer_pct: u64) -> u64 {
    estimate.saturating_mul(100 + buffer_pct) / 100
}

/// JSON-RPC code nodes use for a reverted call.
const EXECUTION_REVERTED_CODE: i64 = 3;

/// Only a revert response to `eth_estimateGas` means the liquidation is
/// refused. Rate limits, nonce errors and the like stay transport failures.
fn classify_estimate_error(token_id: TokenId, err: TransportError) -> ChainError {
    match err.as_error_resp() {
        Some(payload)
            if payload.code == EXECUTION_REVERTED_CODE
                || payload.message.to_ascii_lowercase().contains("revert") =>
        {
            ChainError::SimulationRejected {
                token_id,
                reason: payload.message.to_string(),
            }
        }
        _ => ChainError::transport(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::rpc::json_rpc::ErrorPayload;
    use alloy::transports::TransportErrorKind;

    fn error_response(code: i64, message: &'static str) -> TransportError {
        TransportError::ErrorResp(ErrorPayload {
            code,
            message: message.into(),
            data: None,
        })
    }

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    #[test]
    fn test_nonce_manager() {
        let manager = NonceManager::new(10);

        assert_eq!(manager.next(), 10);
        assert_eq!(manager.next(), 11);
        assert_eq!(manager.next(), 12);
    }

    #[test]
    fn test_gas_buffer() {
        assert_eq!(apply_gas_buffer(100_000, 40), 140_000);
        assert_eq!(apply_gas_buffer(100_000, 0), 100_000);
        assert_eq!(apply_gas_buffer(u64::MAX, 40), u64::MAX / 100);
    }

    #[test]
    fn test_transport_failure_is_not_a_rejection() {
        let err = classify_estimate_error(3, TransportErrorKind::custom_str("connection reset"));
        assert!(matches!(err, ChainError::Transport(_)));
    }

    #[test]
    fn test_revert_response_is_a_rejection() {
        let err = classify_estimate_error(3, error_response(3, "execution reverted: not liquidatable"));
        assert!(matches!(err, ChainError::SimulationRejected { token_id: 3, .. }));

        let err = classify_estimate_error(3, error_response(-32000, "execution reverted"));
        assert!(err.is_simulation_rejection());
    }

    #[test]
    fn test_non_revert_error_response_is_transport() {
        let err = classify_estimate_error(3, error_response(-32005, "rate limit exceeded"));
        assert!(matches!(err, ChainError::Transport(_)));

        let err = classify_estimate_error(3, error_response(-32000, "nonce too low"));
        assert!(!err.is_simulation_rejection());
    }

    #[test]
    fn test_builder_derives_signer_address() {
        let sender = TransactionSenderBuilder::new("http://localhost:8545", 8453, Address::ZERO)
            .gas_limit_buffer_pct(40)
            .confirmation_timeout(Duration::from_secs(30))
            .build(TEST_KEY)
            .unwrap();

        assert_eq!(
            format!("{:?}", sender.address).to_lowercase(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(format!("{sender:?}").contains("Legacy"));
    }

    #[test]
    fn test_builder_rejects_bad_key() {
        let err = TransactionSenderBuilder::new("http://localhost:8545", 8453, Address::ZERO)
            .build("0xnothex")
            .unwrap_err();
        assert!(matches!(err, ChainError::Signer(_)));
    }
}
