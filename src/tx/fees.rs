//! Fee estimation for both ledger models

use crate::chain::ChainDataProvider;
use crate::error::{SwapError, SwapResult};

use ethers::types::U256;
use rust_decimal::Decimal;
use tracing::debug;

/// Fee as reported by a chain backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeEstimate {
    /// Flat fee per transaction, in display units
    PerTransaction(Decimal),
    /// Price per unit of gas, in base units
    GasPrice(U256),
}

/// Everything an account-model transaction needs besides its call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeParams {
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
}

/// Fee attached to a contract spend (redeem or refund)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFee {
    Utxo(Decimal),
    Account(FeeParams),
}

/// Fee estimator on top of a chain data provider
pub struct FeeEstimator {
    /// Buffer percentage for gas price (e.g., 10 = 10% buffer)
    gas_price_buffer_percent: u64,
}

impl FeeEstimator {
    pub fn new() -> Self {
        Self {
            gas_price_buffer_percent: 10,
        }
    }

    /// Flat fee for a UTXO-model transaction
    pub async fn utxo_fee(&self, provider: &dyn ChainDataProvider) -> SwapResult<Decimal> {
        match provider.fee_estimate().await {
            Some(FeeEstimate::PerTransaction(fee)) => {
                debug!("Fee for chain {}: {}", provider.symbol(), fee);
                Ok(fee)
            }
            Some(FeeEstimate::GasPrice(_)) => Err(SwapError::UnsupportedOperation {
                operation: "flat fee".to_string(),
                symbol: provider.symbol().to_string(),
            }),
            None => Err(unavailable(provider, "no fee estimate")),
        }
    }

    /// Buffered gas price for an account-model transaction
    pub async fn gas_price(&self, provider: &dyn ChainDataProvider) -> SwapResult<U256> {
        match provider.fee_estimate().await {
            Some(FeeEstimate::GasPrice(price)) => {
                let buffered = price + price * self.gas_price_buffer_percent / 100;
                debug!("Gas price for chain {}: {}", provider.symbol(), buffered);
                Ok(buffered)
            }
            Some(FeeEstimate::PerTransaction(_)) => Err(SwapError::UnsupportedOperation {
                operation: "gas price".to_string(),
                symbol: provider.symbol().to_string(),
            }),
            None => Err(unavailable(provider, "no gas price")),
        }
    }

    /// Nonce and gas settings for the next transaction from `sender`
    pub async fn account_fee_params(
        &self,
        provider: &dyn ChainDataProvider,
        sender: &str,
        gas_limit: u64,
    ) -> SwapResult<FeeParams> {
        let nonce = provider
            .next_nonce(sender)
            .await
            .ok_or_else(|| unavailable(provider, "no nonce"))?;
        let gas_price = self.gas_price(provider).await?;

        Ok(FeeParams {
            nonce: U256::from(nonce),
            gas_price,
            gas_limit: U256::from(gas_limit),
        })
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new()
    }
}

fn unavailable(provider: &dyn ChainDataProvider, message: &str) -> SwapError {
    SwapError::BackendUnavailable {
        symbol: provider.symbol().to_string(),
        message: message.to_string(),
    }
}
