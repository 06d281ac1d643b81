//! Backend for Insight-style REST block explorers

use super::graphql::{is_hex_id, DEFAULT_FIXED_FEE};
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
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Target confirmation window for fee estimates
const FEE_BLOCKS: u32 = 2;

/// Size of a one-input one-output HTLC redeem, the largest swap spend:
/// 10 bytes framing, 267 byte input (224 byte scriptSig), 34 byte P2PKH output
const HTLC_SPEND_BYTES: u32 = 311;

pub struct InsightProvider {
    symbol: String,
    api_url: String,
    ui_url: String,
    codec: Base58Codec,
    decimals: u32,
    fixed_fee: Decimal,
    transport: Arc<dyn JsonTransport>,
}

impl InsightProvider {
    pub fn new(config: &ChainConfig, transport: Arc<dyn JsonTransport>) -> SwapResult<Self> {
        let prefixes = config.base58.ok_or_else(|| {
            SwapError::Config(format!("{} has no base58 prefixes", config.symbol))
        })?;
        let api_url = config.api_url.trim_end_matches('/').to_string();

        Ok(Self {
            symbol: config.symbol.clone(),
            ui_url: config
                .ui_url
                .as_deref()
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| api_url.clone()),
            api_url,
            codec: Base58Codec::new(prefixes),
            decimals: config.decimals,
            fixed_fee: config.fixed_fee.unwrap_or(DEFAULT_FIXED_FEE),
            transport,
        })
    }

    async fn get(&self, path: &str) -> Option<Value> {
        let url = format!("{}{}", self.api_url, path);
        match self.transport.get_json(&url).await {
            Ok(response) => Some(response),
            Err(e) => {
                error!("Request to {} failed ({}): {:#}", url, self.symbol, e);
                None
            }
        }
    }

    async fn unspent(&self, address: &str) -> SwapResult<Option<Vec<UnspentOutput>>> {
        self.codec.decode(address)?;

        let Some(response) = self.get(&format!("/addr/{}/utxo", address)).await else {
            return Ok(None);
        };
        let Some(outputs) = response.as_array() else {
            error!("Cannot get unspent outputs, bad response ({})", self.symbol);
            return Ok(None);
        };
        Ok(Some(outputs.iter().filter_map(parse_unspent).collect()))
    }
}

fn parse_unspent(utxo: &Value) -> Option<UnspentOutput> {
    Some(UnspentOutput {
        transaction_id: utxo["txid"].as_str()?.to_string(),
        output_index: u32::try_from(u64_field(&utxo["vout"])?).ok()?,
        value: decimal_field(&utxo["amount"])?,
        locking_script: utxo["scriptPubKey"].as_str()?.to_string(),
    })
}

fn parse_transaction(tx: &Value) -> Option<ChainTransaction> {
    let inputs = tx["vin"]
        .as_array()?
        .iter()
        .map(|vin| TxInput {
            tx_id: vin["txid"].as_str().map(str::to_string),
            index: u64_field(&vin["vout"]).and_then(|i| u32::try_from(i).ok()),
            script_sig: vin["scriptSig"]["hex"].as_str().unwrap_or_default().to_string(),
            source_address: vin["addr"].as_str().map(str::to_string),
            value: decimal_field(&vin["value"]),
        })
        .collect();

    let outputs = tx["vout"]
        .as_array()?
        .iter()
        .map(|vout| {
            Some(TxOutput {
                index: u32::try_from(u64_field(&vout["n"])?).ok()?,
                value: decimal_field(&vout["value"])?,
                locking_script: vout["scriptPubKey"]["hex"].as_str()?.to_string(),
                spent_by: vout["spentTxId"].as_str().map(str::to_string),
            })
        })
        .collect::<Option<Vec<_>>>()?;

    Some(ChainTransaction {
        id: tx["txid"].as_str()?.to_string(),
        inputs,
        outputs,
        block_hash: tx["blockhash"].as_str().map(str::to_string),
        block_height: u64_field(&tx["blockheight"]),
        call: None,
    })
}

#[async_trait]
impl ChainDataProvider for InsightProvider {
    fn symbol(&self) -> &str {
        &self.symbol
    }

    fn model(&self) -> LedgerModel {
        LedgerModel::Utxo
    }

    async fn latest_block(&self) -> Option<u64> {
        let response = self.get("/status?q=getInfo").await?;
        let latest = u64_field(&response["info"]["blocks"]);
        match latest {
            Some(height) => debug!("Latest block found: {}", height),
            None => error!("Cannot get latest block, bad response ({})", self.symbol),
        }
        latest
    }

    async fn latest_block_time(&self) -> Option<DateTime<Utc>> {
        let response = self.get(&format!("/blocks?limit={}", MEDIAN_TIME_SPAN)).await?;
        let times: Vec<i64> = response["blocks"]
            .as_array()
            .map(|blocks| blocks.iter().filter_map(|block| block["time"].as_i64()).collect())
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
        let response = self.get(&format!("/tx/{}", tx_id)).await?;
        let parsed = parse_transaction(&response);
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

        let response = self.get(&format!("/addr/{}", contract_address)).await?;
        let Some(newest_first) = response["transactions"].as_array() else {
            error!("Cannot get contract transactions ({})", self.symbol);
            return None;
        };
        let transactions: Vec<&str> = newest_first.iter().rev().filter_map(Value::as_str).collect();

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
        let response = self.get(&format!("/block-index/{}", height)).await?;
        let Some(hash) = response["blockHash"].as_str() else {
            error!("Cannot get block hash for block {} ({})", height, self.symbol);
            return None;
        };
        debug!("Found hash for block {}: {}", height, hash);
        Some(hash.to_string())
    }

    fn transaction_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.ui_url, tx_hash)
    }

    /// Fee for one HTLC spend from the node's per-kB fee rate
    async fn fee_estimate(&self) -> Option<FeeEstimate> {
        let per_kb = self
            .get(&format!("/utils/estimatefee?nbBlocks={}", FEE_BLOCKS))
            .await
            .and_then(|response| decimal_field(&response[FEE_BLOCKS.to_string()]))
            .filter(|rate| rate.is_sign_positive() && !rate.is_zero());
        let estimated = per_kb.map(|rate| {
            (rate * Decimal::from(HTLC_SPEND_BYTES) / Decimal::from(1000))
                .round_dp_with_strategy(self.decimals, RoundingStrategy::AwayFromZero)
        });

        let fee = estimated.unwrap_or_else(|| {
            debug!("No fee estimate ({}), using {}", self.symbol, self.fixed_fee);
            self.fixed_fee
        });
        Some(FeeEstimate::PerTransaction(fee))
    }
}
