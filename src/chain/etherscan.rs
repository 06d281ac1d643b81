//! Backend for account-model chains explored through an Etherscan-compatible API
//!
//! Every swap lives in one shared contract, so a contract's history is the
//! contract address's transaction list filtered by secret hash.

use super::{u64_field, CallPayload, ChainDataProvider, ChainTransaction, JsonTransport, Resolution};
use crate::chain::UnspentOutput;
use crate::codec::address::parse_account_address;
use crate::codec::SwapCall;
use crate::config::{ChainConfig, LedgerModel};
use crate::contract::{Secret, SecretHash};
use crate::error::{SwapError, SwapResult};
use crate::tx::{FeeEstimate, Scale};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ethers::types::U256;
use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct EtherscanProvider {
    symbol: String,
    api_url: String,
    ui_url: String,
    api_key: Option<String>,
    scale: Scale,
    transport: Arc<dyn JsonTransport>,
}

impl EtherscanProvider {
    pub fn new(config: &ChainConfig, transport: Arc<dyn JsonTransport>) -> SwapResult<Self> {
        if config.api_url.is_empty() {
            return Err(SwapError::Config(format!("{} has no API URL", config.symbol)));
        }
        let api_url = config.api_url.trim_end_matches('/').to_string();

        Ok(Self {
            symbol: config.symbol.clone(),
            ui_url: config
                .ui_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| api_url.clone()),
            api_url,
            api_key: config.api_key().map(str::to_string),
            scale: Scale::new(config.decimals),
            transport,
        })
    }

    fn url(&self, query: &str) -> String {
        match &self.api_key {
            Some(key) => format!("{}?{}&apikey={}", self.api_url, query, key),
            None => format!("{}?{}", self.api_url, query),
        }
    }

    /// `result` member of a response, `None` on transport failure or API error
    async fn call(&self, query: &str) -> Option<Value> {
        let response = match self.transport.get_json(&self.url(query)).await {
            Ok(response) => response,
            Err(e) => {
                error!("Etherscan request failed ({}): {:#}", self.symbol, e);
                return None;
            }
        };

        if let Some(err) = response.get("error") {
            error!("Etherscan error ({}): {}", self.symbol, err);
            return None;
        }
        match response.get("result") {
            Some(Value::Null) | None => {
                debug!("Empty Etherscan result for {} ({})", query, self.symbol);
                None
            }
            Some(result) => Some(result.clone()),
        }
    }

    /// Contract transactions ordered oldest first
    async fn contract_history(&self, contract_address: &str) -> Option<Vec<Value>> {
        let query = format!(
            "module=account&action=txlist&address={}&sort=asc",
            contract_address
        );
        match self.call(&query).await? {
            Value::Array(transactions) => Some(transactions),
            other => {
                // "No transactions found" comes back as a status message
                error!("Cannot get contract transactions ({}): {}", self.symbol, other);
                None
            }
        }
    }
}

/// Quantity encoded as 0x-prefixed hex or a decimal string
fn u256_field(value: &Value) -> Option<U256> {
    let s = value.as_str()?;
    match s.strip_prefix("0x") {
        Some(hex) if hex.is_empty() => Some(U256::zero()),
        Some(hex) => U256::from_str_radix(hex, 16).ok(),
        None => U256::from_dec_str(s).ok(),
    }
}

fn bytes_field(value: &Value) -> Option<Vec<u8>> {
    hex::decode(value.as_str()?.trim_start_matches("0x")).ok()
}

fn parse_transaction(tx: &Value) -> Option<ChainTransaction> {
    let from = tx["from"].as_str().and_then(|a| parse_account_address(a).ok())?;
    let to = match tx["to"].as_str() {
        Some(to) if !to.is_empty() => Some(parse_account_address(to).ok()?),
        _ => None,
    };

    Some(ChainTransaction {
        id: tx["hash"].as_str()?.to_string(),
        inputs: vec![],
        outputs: vec![],
        block_hash: tx["blockHash"].as_str().map(str::to_string),
        block_height: u64_field(&tx["blockNumber"]),
        call: Some(CallPayload {
            from,
            to,
            value: u256_field(&tx["value"])?,
            input: bytes_field(&tx["input"])?,
        }),
    })
}

/// Resolution carried by one history entry, if it touches `secret_hash`
fn resolution_of(entry: &Value, secret_hash: &SecretHash) -> Option<Resolution> {
    if entry["isError"].as_str() == Some("1") {
        return None;
    }
    let input = bytes_field(&entry["input"])?;
    match SwapCall::decode(&input).ok()? {
        SwapCall::Redeem { secret } => {
            let secret = Secret::from(secret);
            secret_hash.matches(&secret).then_some(Resolution::Redeemed(secret))
        }
        SwapCall::Refund { secret_hash: refunded } => {
            (refunded == *secret_hash.as_bytes()).then_some(Resolution::Refunded)
        }
        _ => None,
    }
}

#[async_trait]
impl ChainDataProvider for EtherscanProvider {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn model(&self) -> LedgerModel {
        LedgerModel::Account
    }

    async fn latest_block(&self) -> Option<u64> {
        let result = self.call("module=proxy&action=eth_blockNumber").await?;
        let latest = u64_field(&result);
        match latest {
            Some(height) => debug!("Latest block found: {}", height),
            None => error!("Cannot get latest block, bad response ({})", self.symbol),
        }
        latest
    }

    async fn latest_block_time(&self) -> Option<DateTime<Utc>> {
        let block = self
            .call("module=proxy&action=eth_getBlockByNumber&tag=latest&boolean=false")
            .await?;
        let time = u64_field(&block["timestamp"])
            .and_then(|seconds| i64::try_from(seconds).ok())
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single());
        if time.is_none() {
            error!("Cannot get latest block time, bad response ({})", self.symbol);
        }
        time
    }

    async fn get_transaction(&self, tx_id: &str) -> Option<ChainTransaction> {
        let hash = tx_id.trim_start_matches("0x");
        if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            warn!("Refusing to look up malformed transaction hash {:?}", tx_id);
            return None;
        }
        let query = format!("module=proxy&action=eth_getTransactionByHash&txhash=0x{}", hash);
        let result = self.call(&query).await?;
        let parsed = parse_transaction(&result);
        if parsed.is_none() {
            error!("Cannot parse transaction {} ({})", tx_id, self.symbol);
        }
        parsed
    }

    async fn get_unspent_outputs(
        &self,
        _address: &str,
        _target: Decimal,
    ) -> SwapResult<Option<Vec<UnspentOutput>>> {
        Err(SwapError::UnsupportedOperation {
            operation: "unspent outputs".to_string(),
            symbol: self.symbol.clone(),
        })
    }

    async fn get_balance(&self, address: &str) -> SwapResult<Option<Decimal>> {
        let address = parse_account_address(address)?;
        let query = format!(
            "module=account&action=balance&address={:?}&tag=latest",
            address
        );
        let Some(wei) = self.call(&query).await.as_ref().and_then(u256_field) else {
            error!("Cannot get balance, bad response ({})", self.symbol);
            return Ok(None);
        };
        Ok(Some(self.scale.from_base_units(wei)?))
    }

    async fn resolve_contract(
        &self,
        contract_address: &str,
        secret_hash: &SecretHash,
    ) -> Option<Resolution> {
        let Ok(contract) = parse_account_address(contract_address) else {
            warn!("Malformed contract address {:?} ({})", contract_address, self.symbol);
            return None;
        };

        let history = self.contract_history(&format!("{:?}", contract)).await?;
        let resolution = history
            .iter()
            .find_map(|entry| resolution_of(entry, secret_hash));

        match resolution {
            Some(resolution) => Some(resolution),
            None => {
                debug!("There is no redeem transaction on this contract yet.");
                Some(Resolution::Unresolved)
            }
        }
    }

    async fn next_nonce(&self, address: &str) -> Option<u64> {
        let address = parse_account_address(address).ok()?;
        let query = format!(
            "module=proxy&action=eth_getTransactionCount&address={:?}&tag=pending",
            address
        );
        u64_field(&self.call(&query).await?)
    }

    async fn block_hash(&self, height: u64) -> Option<String> {
        let query = format!(
            "module=proxy&action=eth_getBlockByNumber&tag={:#x}&boolean=false",
            height
        );
        let block = self.call(&query).await?;
        let Some(hash) = block["hash"].as_str() else {
            error!("Cannot get block hash for block {} ({})", height, self.symbol);
            return None;
        };
        debug!("Found hash for block {}: {}", height, hash);
        Some(hash.to_string())
    }

    fn transaction_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.ui_url, tx_hash)
    }

    async fn fee_estimate(&self) -> Option<FeeEstimate> {
        let result = self.call("module=proxy&action=eth_gasPrice").await?;
        u256_field(&result).map(FeeEstimate::GasPrice)
    }
}
