//! Swap contracts: model, builders and auditor
//!
//! This module provides:
//! - `SwapContract`, the decoded view of an initiate transaction
//! - Secrets and the hash committing to them
//! - Account-model and UTXO-model builders behind one `ContractBuilder`
//! - `ContractAuditor`, which decodes and classifies on-chain contracts

pub mod account;
pub mod auditor;
pub mod builder;
pub mod secret;
pub mod token;
pub mod utxo;

pub use auditor::{ContractAuditor, ResolvedContract};
pub use builder::{ContractBuilder, Funding, InitiateParams, InitiateTransaction};
pub use secret::{Secret, SecretHash};
pub use token::{TokenDescriptor, TokenRegistry};

use crate::tx::Scale;

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resolved status of a contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Initiated,
    Redeemed,
    Refunded,
    Expired,
    Invalid,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            LifecycleStage::Initiated => "initiated",
            LifecycleStage::Redeemed => "redeemed",
            LifecycleStage::Refunded => "refunded",
            LifecycleStage::Expired => "expired",
            LifecycleStage::Invalid => "invalid",
        };
        f.write_str(stage)
    }
}

/// Asset locked in a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Asset {
    Native { symbol: String, decimals: u32 },
    Token(TokenDescriptor),
}

impl Asset {
    pub fn symbol(&self) -> &str {
        match self {
            Asset::Native { symbol, .. } => symbol,
            Asset::Token(token) => &token.symbol,
        }
    }

    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Native { decimals, .. } => *decimals,
            Asset::Token(token) => token.decimals,
        }
    }

    pub fn token_address(&self) -> Option<&str> {
        match self {
            Asset::Native { .. } => None,
            Asset::Token(token) => Some(&token.address),
        }
    }
}

/// Where the contract lives on its ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractLocation {
    /// Shared swap contract, keyed by secret hash
    Account,
    /// P2SH output of the initiate transaction
    Utxo { script: Vec<u8>, output_index: u32 },
}

/// Transaction id plus whatever the ledger needs to find the contract in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractReference {
    pub tx_id: String,
    /// Hex HTLC script, required on UTXO chains
    pub contract_script: Option<String>,
}

impl ContractReference {
    pub fn account(tx_id: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            contract_script: None,
        }
    }

    pub fn utxo(tx_id: impl Into<String>, contract_script: impl Into<String>) -> Self {
        Self {
            tx_id: tx_id.into(),
            contract_script: Some(contract_script.into()),
        }
    }
}

/// Decoded view of an initiate transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapContract {
    /// Symbol of the chain the contract lives on
    pub chain: String,
    pub transaction_id: String,
    pub contract_address: String,
    pub lock_expiry: DateTime<Utc>,
    pub recipient_address: String,
    pub refund_address: String,
    pub secret_hash: SecretHash,
    /// Locked value in the asset's base units
    pub value: U256,
    pub asset: Asset,
    pub lifecycle_stage: LifecycleStage,
    pub location: ContractLocation,
}

/// Display projection of a contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractDetails {
    pub contract_address: String,
    pub locktime: DateTime<Utc>,
    pub recipient_address: String,
    pub refund_address: String,
    pub secret_hash: String,
    pub transaction_address: String,
    pub value: String,
    pub value_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_script: Option<String>,
}

impl SwapContract {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.lock_expiry
    }

    pub fn with_stage(self, lifecycle_stage: LifecycleStage) -> Self {
        Self {
            lifecycle_stage,
            ..self
        }
    }

    pub fn contract_script(&self) -> Option<&[u8]> {
        match &self.location {
            ContractLocation::Utxo { script, .. } => Some(script),
            ContractLocation::Account => None,
        }
    }

    /// Value at the asset's precision, without the symbol
    pub fn display_value(&self) -> String {
        Scale::new(self.asset.decimals()).format(self.value)
    }

    pub fn show_details(&self) -> ContractDetails {
        ContractDetails {
            contract_address: self.contract_address.clone(),
            locktime: self.lock_expiry,
            recipient_address: self.recipient_address.clone(),
            refund_address: self.refund_address.clone(),
            secret_hash: self.secret_hash.to_string(),
            transaction_address: self.transaction_id.clone(),
            value: self.display_value(),
            value_text: format!("{} {}", self.display_value(), self.asset.symbol()),
            token_address: self.asset.token_address().map(str::to_string),
            contract_script: self.contract_script().map(hex::encode),
        }
    }
}
