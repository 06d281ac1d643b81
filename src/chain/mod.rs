//! Chain module - uniform read-only access to heterogeneous chain backends
//!
//! This module provides:
//! - The `ChainDataProvider` capability and its normalized data model
//! - Backends for GraphQL indexers, Insight REST explorers and Etherscan
//! - A registry of configured chains keyed by ticker symbol

pub mod etherscan;
pub mod graphql;
pub mod insight;
pub mod transport;

pub use etherscan::EtherscanProvider;
pub use graphql::GraphQlProvider;
pub use insight::InsightProvider;
pub use transport::{HttpTransport, JsonTransport};

use crate::codec::script::{classify_spend, HtlcSpend, HtlcTemplate};
use crate::codec::SwapCall;
use crate::config::{BackendKind, ChainConfig, ChainParams, LedgerModel, Settings};
use crate::contract::{Secret, SecretHash, TokenRegistry};
use crate::error::{SwapError, SwapResult};
use crate::tx::FeeEstimate;

use async_trait::async_trait;
use bitcoin::Script;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Spendable output observed on a UTXO chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnspentOutput {
    pub transaction_id: String,
    pub output_index: u32,
    /// Display units
    pub value: Decimal,
    /// Hex locking script
    pub locking_script: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// None for coinbase inputs
    pub tx_id: Option<String>,
    pub index: Option<u32>,
    /// Hex scriptSig
    pub script_sig: String,
    pub source_address: Option<String>,
    pub value: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub index: u32,
    /// Display units
    pub value: Decimal,
    /// Hex locking script
    pub locking_script: String,
    pub spent_by: Option<String>,
}

/// Account-model call carried by a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPayload {
    pub from: Address,
    pub to: Option<Address>,
    /// Base units
    pub value: U256,
    pub input: Vec<u8>,
}

/// Backend-agnostic view of a transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub id: String,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub block_hash: Option<String>,
    pub block_height: Option<u64>,
    pub call: Option<CallPayload>,
}

/// What happened to a contract after it was initiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Unresolved,
    Redeemed(Secret),
    Refunded,
}

/// Read-only view of one chain
///
/// Backend failures and missing data are logged and reported as `None`.
/// Only malformed caller input is an error.
#[async_trait]
pub trait ChainDataProvider: Send + Sync {
    fn symbol(&self) -> &str;

    fn model(&self) -> LedgerModel;

    async fn latest_block(&self) -> Option<u64>;

    /// Time that absolute time locks are checked against
    ///
    /// UTXO chains report the median time past of the last
    /// [`MEDIAN_TIME_SPAN`] blocks, account chains the timestamp of the tip.
    async fn latest_block_time(&self) -> Option<DateTime<Utc>>;

    async fn get_transaction(&self, tx_id: &str) -> Option<ChainTransaction>;

    /// Unspent outputs covering `target`, largest first; `Ok(None)` if the address cannot cover it
    async fn get_unspent_outputs(
        &self,
        address: &str,
        target: Decimal,
    ) -> SwapResult<Option<Vec<UnspentOutput>>>;

    async fn get_balance(&self, address: &str) -> SwapResult<Option<Decimal>>;

    /// Inspect the transactions touching a contract after its initiation
    async fn resolve_contract(
        &self,
        contract_address: &str,
        secret_hash: &SecretHash,
    ) -> Option<Resolution>;

    async fn extract_secret_from_redeem_transaction(
        &self,
        contract_address: &str,
        secret_hash: &SecretHash,
    ) -> Option<Secret> {
        match self.resolve_contract(contract_address, secret_hash).await? {
            Resolution::Redeemed(secret) => Some(secret),
            Resolution::Unresolved | Resolution::Refunded => None,
        }
    }

    /// Secret revealed by a known redeem transaction
    async fn secret_from_redeem_transaction(&self, tx_id: &str) -> SwapResult<Secret> {
        let tx = self
            .get_transaction(tx_id)
            .await
            .ok_or_else(|| SwapError::TransactionNotFound {
                tx_id: tx_id.to_string(),
            })?;
        redeemed_secret(&tx).ok_or_else(|| {
            warn!("Not a redeem transaction: {} ({})", tx_id, self.symbol());
            SwapError::NotAContractTransaction(tx_id.to_string())
        })
    }

    async fn next_nonce(&self, _address: &str) -> Option<u64> {
        None
    }

    async fn block_hash(&self, height: u64) -> Option<String>;

    fn transaction_url(&self, tx_hash: &str) -> String;

    async fn fee_estimate(&self) -> Option<FeeEstimate>;
}

/// Number of blocks whose timestamps give the median time past
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Median of the given block timestamps
pub(crate) fn median_time_past(mut timestamps: Vec<i64>) -> Option<DateTime<Utc>> {
    if timestamps.is_empty() {
        return None;
    }
    timestamps.sort_unstable();
    Utc.timestamp_opt(timestamps[timestamps.len() / 2], 0).single()
}

/// HTLC spends among a transaction's inputs
fn htlc_spends(tx: &ChainTransaction) -> impl Iterator<Item = (HtlcSpend, HtlcTemplate)> + '_ {
    tx.inputs.iter().filter_map(|input| {
        let script_sig = hex::decode(&input.script_sig).ok()?;
        classify_spend(Script::from_bytes(&script_sig))
    })
}

/// Pushed value of a redeem that opens `secret_hash`
fn revealed_secret(pushes: &[Vec<u8>], secret_hash: &SecretHash) -> Option<Secret> {
    pushes.iter().find_map(|push| {
        let secret = Secret::from_slice(push).ok()?;
        secret_hash.matches(&secret).then_some(secret)
    })
}

/// Secret carried by a redeem call or a redeeming HTLC input
pub(crate) fn redeemed_secret(tx: &ChainTransaction) -> Option<Secret> {
    if let Some(call) = &tx.call {
        return match SwapCall::decode(&call.input).ok()? {
            SwapCall::Redeem { secret } => Some(Secret::from(secret)),
            _ => None,
        };
    }
    htlc_spends(tx).find_map(|(spend, template)| match spend {
        HtlcSpend::Redeem { pushes } => {
            revealed_secret(&pushes, &SecretHash::from(template.secret_hash))
        }
        HtlcSpend::Refund => None,
    })
}

/// Resolution of an HTLC from the transaction spending it
pub(crate) fn resolution_from_spend(
    symbol: &str,
    spend: &ChainTransaction,
    secret_hash: &SecretHash,
) -> Option<Resolution> {
    let classified = htlc_spends(spend)
        .find_map(|(branch, template)| (template.secret_hash == *secret_hash.as_bytes()).then_some(branch));

    match classified {
        Some(HtlcSpend::Redeem { pushes }) => {
            let secret = revealed_secret(&pushes, secret_hash);
            if secret.is_none() {
                warn!(
                    "Redeem transaction {} carries no matching secret ({})",
                    spend.id, symbol
                );
            }
            secret.map(Resolution::Redeemed)
        }
        Some(HtlcSpend::Refund) => Some(Resolution::Refunded),
        None => {
            warn!(
                "Transaction {} does not spend a contract for {} ({})",
                spend.id, secret_hash, symbol
            );
            None
        }
    }
}

/// Decimal from a JSON string or number
pub(crate) fn decimal_field(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

/// Non-negative integer from a JSON number, decimal string or 0x-prefixed hex string
pub(crate) fn u64_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => match s.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => s.parse().ok(),
        },
        _ => None,
    }
}

/// Everything the engine knows about one configured chain
pub struct ChainHandle {
    pub params: ChainParams,
    pub provider: Arc<dyn ChainDataProvider>,
    pub tokens: Arc<TokenRegistry>,
}

/// Configured chains indexed by upper-case ticker symbol
pub struct ChainRegistry {
    chains: DashMap<String, Arc<ChainHandle>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self {
            chains: DashMap::new(),
        }
    }

    /// Create a registry with a provider for every enabled chain
    pub fn from_settings(settings: &Settings) -> SwapResult<Self> {
        let registry = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} ({}, {:?} backend)",
                name, chain_config.symbol, chain_config.backend
            );
            let handle = Self::connect(chain_config)?;
            registry.insert(handle);
        }

        Ok(registry)
    }

    fn connect(config: &ChainConfig) -> SwapResult<ChainHandle> {
        let transport = HttpTransport::new(Duration::from_millis(config.request_timeout_ms))
            .map_err(|e| SwapError::Config(e.to_string()))?;
        let transport: Arc<dyn JsonTransport> = Arc::new(transport);
        let params = config.params();

        let provider: Arc<dyn ChainDataProvider> = match config.backend {
            BackendKind::Graphql => Arc::new(GraphQlProvider::new(config, transport)?),
            BackendKind::Insight => Arc::new(InsightProvider::new(config, transport)?),
            BackendKind::Etherscan => Arc::new(EtherscanProvider::new(config, transport)?),
        };
        let tokens = TokenRegistry::from_config(&config.tokens)?;

        Ok(ChainHandle {
            params,
            provider,
            tokens: Arc::new(tokens),
        })
    }

    pub fn insert(&self, handle: ChainHandle) {
        let symbol = handle.params.symbol.to_uppercase();
        debug!("Registered chain {}", symbol);
        self.chains.insert(symbol, Arc::new(handle));
    }

    pub fn get(&self, symbol: &str) -> SwapResult<Arc<ChainHandle>> {
        self.chains
            .get(&symbol.to_uppercase())
            .map(|c| c.clone())
            .ok_or_else(|| SwapError::ChainNotFound {
                symbol: symbol.to_string(),
            })
    }

    /// Latest block of every chain, `None` where the backend did not answer
    pub async fn health_check(&self) -> Vec<(String, Option<u64>)> {
        let handles: Vec<(String, Arc<ChainHandle>)> = self
            .chains
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let checks = handles.into_iter().map(|(symbol, handle)| async move {
            let latest = handle.provider.latest_block().await;
            if latest.is_none() {
                warn!("Chain {} is not answering", symbol);
            }
            (symbol, latest)
        });

        let mut results = futures::future::join_all(checks).await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory provider for exercising the layers above the backends

    use super::*;
    use std::collections::HashMap;

    pub struct StubProvider {
        symbol: String,
        model: LedgerModel,
        fee: Option<FeeEstimate>,
        nonce: Option<u64>,
        chain_time: Option<DateTime<Utc>>,
        transactions: HashMap<String, ChainTransaction>,
        unspent: Option<Vec<UnspentOutput>>,
        resolution: Option<Resolution>,
    }

    impl StubProvider {
        fn new(symbol: &str, model: LedgerModel) -> Self {
            Self {
                symbol: symbol.to_string(),
                model,
                fee: None,
                nonce: None,
                chain_time: None,
                transactions: HashMap::new(),
                unspent: None,
                resolution: Some(Resolution::Unresolved),
            }
        }

        pub fn utxo(symbol: &str) -> Self {
            Self::new(symbol, LedgerModel::Utxo)
        }

        pub fn account(symbol: &str) -> Self {
            Self::new(symbol, LedgerModel::Account)
        }

        pub fn with_fee(mut self, fee: FeeEstimate) -> Self {
            self.fee = Some(fee);
            self
        }

        pub fn with_nonce(mut self, nonce: u64) -> Self {
            self.nonce = Some(nonce);
            self
        }

        pub fn with_chain_time(mut self, chain_time: DateTime<Utc>) -> Self {
            self.chain_time = Some(chain_time);
            self
        }

        pub fn with_transaction(mut self, tx: ChainTransaction) -> Self {
            self.transactions.insert(tx.id.clone(), tx);
            self
        }

        pub fn with_unspent(mut self, unspent: Vec<UnspentOutput>) -> Self {
            self.unspent = Some(unspent);
            self
        }

        pub fn with_resolution(mut self, resolution: Option<Resolution>) -> Self {
            self.resolution = resolution;
            self
        }
    }

    #[async_trait]
    impl ChainDataProvider for StubProvider {
        fn symbol(&self) -> &str {
            &self.symbol
        }

        fn model(&self) -> LedgerModel {
            self.model
        }

        async fn latest_block(&self) -> Option<u64> {
            Some(1)
        }

        async fn latest_block_time(&self) -> Option<DateTime<Utc>> {
            self.chain_time
        }

        async fn get_transaction(&self, tx_id: &str) -> Option<ChainTransaction> {
            self.transactions.get(tx_id).cloned()
        }

        async fn get_unspent_outputs(
            &self,
            _address: &str,
            target: Decimal,
        ) -> SwapResult<Option<Vec<UnspentOutput>>> {
            let Some(mut unspent) = self.unspent.clone() else {
                return Ok(None);
            };
            crate::tx::CoinSelector::sort_descending(&mut unspent);
            Ok(crate::tx::CoinSelector::select(&unspent, target).map(|(selected, _)| selected))
        }

        async fn get_balance(&self, _address: &str) -> SwapResult<Option<Decimal>> {
            Ok(self
                .unspent
                .as_ref()
                .map(|unspent| unspent.iter().map(|o| o.value).sum()))
        }

        async fn resolve_contract(
            &self,
            _contract_address: &str,
            _secret_hash: &SecretHash,
        ) -> Option<Resolution> {
            self.resolution.clone()
        }

        async fn next_nonce(&self, _address: &str) -> Option<u64> {
            self.nonce
        }

        async fn block_hash(&self, _height: u64) -> Option<String> {
            None
        }

        fn transaction_url(&self, tx_hash: &str) -> String {
            format!("https://explorer.invalid/tx/{}", tx_hash)
        }

        async fn fee_estimate(&self) -> Option<FeeEstimate> {
            self.fee
        }
    }
}
