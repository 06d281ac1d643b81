//! Error types for the swap engine

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::contract::LifecycleStage;

/// Main error type for swap operations
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend unavailable for {symbol}: {message}")]
    BackendUnavailable { symbol: String, message: String },

    #[error("Insufficient funds: found {found}, need {need}")]
    InsufficientFunds { found: String, need: String },

    #[error("Not a contract transaction: {0}")]
    NotAContractTransaction(String),

    #[error("Unknown asset: {0}")]
    UnknownAsset(String),

    #[error("Secret does not match secret hash {secret_hash}")]
    SecretMismatch { secret_hash: String },

    #[error(
        "This contract is still valid! It can't be refunded until {} UTC.",
        .expiry.format("%Y-%m-%d %H:%M:%S")
    )]
    ContractNotExpired { expiry: DateTime<Utc> },

    #[error("Malformed address {address}: {reason}")]
    MalformedAddress { address: String, reason: String },

    #[error("Scale mismatch: {left} decimals mixed with {right} decimals")]
    ScaleMismatch { left: u32, right: u32 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Chain {symbol} not found")]
    ChainNotFound { symbol: String },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Contract is {stage}, expected an initiated contract")]
    ContractNotActive { stage: LifecycleStage },

    #[error("{operation} is not supported on {symbol}")]
    UnsupportedOperation { operation: String, symbol: String },
}

impl SwapError {
    /// Check if the caller may retry the operation later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwapError::BackendUnavailable { .. } | SwapError::TransactionNotFound { .. }
        )
    }

    pub(crate) fn malformed_address(address: &str, reason: impl Into<String>) -> Self {
        SwapError::MalformedAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for swap operations
pub type SwapResult<T> = Result<T, SwapError>;
