//! Backend for chains indexed by a GraphQL engine

use super::{
    decimal_field, median_time_past, resolution_from_spend, u64_field, ChainDataProvider,
    ChainTransaction, JsonTransport, Resolution, TxInput, TxOutput, UnspentOutput,
    MEDIAN_TIME_SPAN,
};
use crate::codec::Base58Codec;
use crate::config::{ChainConfig, LedgerModel};
use crate::contract::SecretHash;
use crate::error::{SwapError, SwapResult};
use crate::tx::{CoinSelector, FeeEstimate};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Flat fee used when no backend exposes a fee oracle
pub const DEFAULT_FIXED_FEE: Decimal = Decimal::from_parts(1, 0, 0, false, 4);

const LATEST_BLOCK_QUERY: &str = r#"{
    allBlocks(orderBy: HEIGHT_DESC, first: 1) {
        nodes { height }
    }
}"#;

const BLOCK_TIMES_QUERY: &str = r#"{
    allBlocks(orderBy: HEIGHT_DESC, first: $count) {
        nodes { height time }
    }
}"#;

const TRANSACTION_QUERY: &str = r#"{
    txByTxId(txId: "$tx_id") {
        txId
        vinsByTxId { nodes { txId vout n scriptSig address value } }
        voutsByTxId { nodes { txId n value scriptPubKey spendingN spendingTxId } }
        blockHash
        blockByBlockHash { hash height }
    }
}"#;

const UNSPENT_QUERY: &str = r#"{
    getAddressTxs(_address: "$address") {
        nodes {
            voutsByTxId(condition: { spendingN: null }) {
                nodes { txId n value scriptPubKey }
            }
        }
    }
}"#;

const ADDRESS_TRANSACTIONS_QUERY: &str = r#"{
    allAddressTxes(orderBy: TIME_ASC, condition: { address: "$address" }) {
        nodes { txId }
    }
}"#;

pub struct GraphQlProvider {
    symbol: String,
    api_url: String,
    codec: Base58Codec,
    fixed_fee: Decimal,
    transport: Arc<dyn JsonTransport>,
}

impl GraphQlProvider {
    pub fn new(config: &ChainConfig, transport: Arc<dyn JsonTransport>) -> SwapResult<Self> {
        let prefixes = config.base58.ok_or_else(|| {
            SwapError::Config(format!("{} has no base58 prefixes", config.symbol))
        })?;

        Ok(Self {
            symbol: config.symbol.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            codec: Base58Codec::new(prefixes),
            fixed_fee: config.fixed_fee.unwrap_or(DEFAULT_FIXED_FEE),
            transport,
        })
    }

    /// Run a query, returning its `data` member
    async fn query(&self, query: String) -> Option<Value> {
        let url = format!("{}/graphql", self.api_url);
        let response = match self.transport.post_json(&url, &json!({ "query": query })).await {
            Ok(response) => response,
            Err(e) => {
                error!("GraphQL request failed ({}): {:#}", self.symbol, e);
                return None;
            }
        };

        if let Some(errors) = response.get("errors") {
            error!("GraphQL errors ({}): {}", self.symbol, errors);
            return None;
        }
        response.get("data").cloned()
    }

    /// Unspent outputs of an address in backend order
    async fn unspent(&self, address: &str) -> SwapResult<Option<Vec<UnspentOutput>>> {
        self.codec.decode(address)?;

        let Some(data) = self.query(UNSPENT_QUERY.replace("$address", address)).await else {
            return Ok(None);
        };
        let Some(nodes) = data["getAddressTxs"]["nodes"].as_array() else {
            error!("Cannot get unspent outputs, bad response ({})", self.symbol);
            return Ok(None);
        };

        let outputs = nodes
            .iter()
            .filter_map(|node| node["voutsByTxId"]["nodes"].as_array())
            .flatten()
            .filter_map(parse_unspent)
            .collect();
        Ok(Some(outputs))
    }
}

fn parse_unspent(vout: &Value) -> Option<UnspentOutput> {
    Some(UnspentOutput {
        transaction_id: vout["txId"].as_str()?.to_string(),
        output_index: u32::try_from(u64_field(&vout["n"])?).ok()?,
        value: decimal_field(&vout["value"])?,
        locking_script: script_hex(&vout["scriptPubKey"])?,
    })
}

/// Script columns hold either raw hex or a JSON document with a `hex` member
pub(crate) fn script_hex(value: &Value) -> Option<String> {
    match value {
        Value::Object(script) => script.get("hex")?.as_str().map(str::to_string),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(script)) => script.get("hex")?.as_str().map(str::to_string),
            _ => hex::decode(s).ok().map(|_| s.clone()),
        },
        Value::Null => Some(String::new()),
        _ => None,
    }
}

fn parse_transaction(tx: &Value) -> Option<ChainTransaction> {
    let inputs = tx["vinsByTxId"]["nodes"]
        .as_array()?
        .iter()
        .map(|vin| TxInput {
            tx_id: vin["txId"].as_str().map(str::to_string),
            index: u64_field(&vin["vout"]).and_then(|i| u32::try_from(i).ok()),
            script_sig: script_hex(&vin["scriptSig"]).unwrap_or_default(),
            source_address: vin["address"].as_str().map(str::to_string),
            value: decimal_field(&vin["value"]),
        })
        .collect();

    let outputs = tx["voutsByTxId"]["nodes"]
        .as_array()?
        .iter()
        .map(|vout| {
            Some(TxOutput {
                index: u32::try_from(u64_field(&vout["n"])?).ok()?,
                value: decimal_field(&vout["value"])?,
                locking_script: script_hex(&vout["scriptPubKey"])?,
                spent_by: vout["spendingTxId"].as_str().map(str::to_string),
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ChainTransaction {
        id: tx["txId"].as_str()?.to_string(),
        inputs,
        outputs,
        block_hash: tx["blockHash"].as_str().map(str::to_string),
        block_height: u64_field(&tx["blockByBlockHash"]["height"]),
        call: None,
    })
}

pub(crate) fn is_hex_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit())
}

#[async_trait]
impl ChainDataProvider for GraphQlProvider {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn model(&self) -> LedgerModel {
        LedgerModel::Utxo
    }

    async fn latest_block(&self) -> Option<u64> {
        let data = self.query(LATEST_BLOCK_QUERY.to_string()).await?;
        let Some(height) = u64_field(&data["allBlocks"]["nodes"][0]["height"]) else {
            error!("Cannot get latest block, bad response ({})", self.symbol);
            return None;
        };
        if height == 0 {
            debug!("Latest block not found ({})", self.symbol);
            return None;
        }
        debug!("Latest block found: {}", height);
        Some(height)
    }

    async fn latest_block_time(&self) -> Option<DateTime<Utc>> {
        let query = BLOCK_TIMES_QUERY.replace("$count", &MEDIAN_TIME_SPAN.to_string());
        let data = self.query(query).await?;
        let times: Vec<i64> = data["allBlocks"]["nodes"]
            .as_array()
            .map(|nodes| {
                nodes
                    .iter()
                    .filter_map(|node| u64_field(&node["time"]))
                    .filter_map(|time| i64::try_from(time).ok())
                    .collect()
            })
            .unwrap_or_default();
        let median = median_time_past(times);
        if median.is_none() {
            error!("Cannot get block times, bad response ({})", self.symbol);
        }
        median
    }

    async fn get_transaction(&self, tx_id: &str) -> Option<ChainTransaction> {
        if !is_hex_id(tx_id) {
            warn!("Refusing to look up malformed transaction id {:?}", tx_id);
            return None;
        }
        let data = self.query(TRANSACTION_QUERY.replace("$tx_id", tx_id)).await?;
        let tx = &data["txByTxId"];
        if tx.is_null() {
            debug!("Transaction {} not found ({})", tx_id, self.symbol);
            return None;
        }
        let parsed = parse_transaction(tx);
        if parsed.is_none() {
            error!("Cannot parse transaction {} ({})", tx_id, self.symbol);
        }
        parsed
    }

    async fn get_unspent_outputs(
        &self,
        address: &str,
        target: Decimal,
    ) -> SwapResult<Option<Vec<UnspentOutput>>> {
        let Some(mut unspent) = self.unspent(address).await? else {
            return Ok(None);
        };
        CoinSelector::sort_descending(&mut unspent);
        Ok(CoinSelector::select(&unspent, target).map(|(selected, _)| selected))
    }

    async fn get_balance(&self, address: &str) -> SwapResult<Option<Decimal>> {
        Ok(self
            .unspent(address)
            .await?
            .map(|unspent| unspent.iter().map(|o| o.value).sum()))
    }

    async fn resolve_contract(
        &self,
        contract_address: &str,
        secret_hash: &SecretHash,
    ) -> Option<Resolution> {
        if self.codec.decode(contract_address).is_err() {
            warn!("Malformed contract address {:?} ({})", contract_address, self.symbol);
            return None;
        }

        let data = self
            .query(ADDRESS_TRANSACTIONS_QUERY.replace("$address", contract_address))
            .await?;
        let transactions: Vec<&str> = data["allAddressTxes"]["nodes"]
            .as_array()
            .map(|nodes| nodes.iter().filter_map(|n| n["txId"].as_str()).collect())
            .unwrap_or_default();

        if transactions.is_empty() {
            error!("Cannot get contract transactions ({})", self.symbol);
            return None;
        }
        if transactions.len() < 2 {
            debug!("There is no redeem transaction on this contract yet.");
            return Some(Resolution::Unresolved);
        }

        let Some(spend) = self.get_transaction(transactions[1]).await else {
            error!("Cannot get redeem transaction ({})", self.symbol);
            return None;
        };
        resolution_from_spend(&self.symbol, &spend, secret_hash)
    }

    async fn block_hash(&self, height: u64) -> Option<String> {
        let url = format!("{}/block-index/{}", self.api_url, height);
        let response = match self.transport.get_json(&url).await {
            Ok(response) => response,
            Err(e) => {
                error!("Cannot get block hash for block {} ({}): {:#}", height, self.symbol, e);
                return None;
            }
        };
        let Some(hash) = response["blockHash"].as_str() else {
            error!("Cannot get block hash for block {} ({})", height, self.symbol);
            return None;
        };
        debug!("Found hash for block {}: {}", height, hash);
        Some(hash.to_string())
    }

    fn transaction_url(&self, _tx_hash: &str) -> String {
        self.api_url.clone()
    }

    async fn fee_estimate(&self) -> Option<FeeEstimate> {
        Some(FeeEstimate::PerTransaction(self.fixed_fee))
    }
}
