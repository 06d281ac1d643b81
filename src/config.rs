//! Configuration management for the swap engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub swap: SwapConfig,
    pub chains: HashMap<String, ChainConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    /// Lock duration for the leg that reveals the secret
    pub initiator_lock_hours: i64,
    /// Lock duration for the counter-leg, must expire first
    pub participant_lock_hours: i64,
    pub initiate_gas_limit: u64,
    pub redeem_gas_limit: u64,
    pub refund_gas_limit: u64,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            initiator_lock_hours: 48,
            participant_lock_hours: 24,
            initiate_gas_limit: 200_000,
            redeem_gas_limit: 100_000,
            refund_gas_limit: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub symbol: String,
    pub backend: BackendKind,
    pub api_url: String,
    pub ui_url: Option<String>,
    pub api_key: Option<String>,
    pub decimals: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    pub fixed_fee: Option<Decimal>,
    pub base58: Option<Base58Prefixes>,
    pub chain_id: Option<u64>,
    pub contract_address: Option<String>,
    pub token_contract_address: Option<String>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    pub enabled: bool,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Block-data backend family
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Graphql,
    Insight,
    Etherscan,
}

/// Ledger model of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerModel {
    Utxo,
    Account,
}

impl BackendKind {
    pub fn model(&self) -> LedgerModel {
        match self {
            BackendKind::Graphql | BackendKind::Insight => LedgerModel::Utxo,
            BackendKind::Etherscan => LedgerModel::Account,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct Base58Prefixes {
    pub pubkey_addr: u8,
    pub script_addr: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub symbol: String,
    pub address: String,
    pub decimals: u32,
}

/// Immutable per-chain parameters handed to every component that needs them
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub symbol: String,
    pub model: LedgerModel,
    pub decimals: u32,
    pub base58: Option<Base58Prefixes>,
    pub chain_id: Option<u64>,
    pub contract_address: Option<String>,
    pub token_contract_address: Option<String>,
}

impl ChainConfig {
    /// API key, if one is set to a non-empty value
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }

    pub fn params(&self) -> ChainParams {
        ChainParams {
            symbol: self.symbol.clone(),
            model: self.backend.model(),
            decimals: self.decimals,
            base58: self.base58,
            chain_id: self.chain_id,
            contract_address: self.contract_address.clone(),
            token_contract_address: self.token_contract_address.clone(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("SWAP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        if self.swap.participant_lock_hours >= self.swap.initiator_lock_hours {
            anyhow::bail!("Participant lock must be shorter than initiator lock");
        }

        for (name, chain) in self.enabled_chains() {
            if chain.api_url.is_empty() {
                anyhow::bail!("Chain {} has no API URL configured", name);
            }
            match chain.backend.model() {
                LedgerModel::Utxo if chain.base58.is_none() => {
                    anyhow::bail!("UTXO chain {} has no base58 prefixes configured", name);
                }
                LedgerModel::Account if chain.contract_address.is_none() => {
                    anyhow::bail!("Account chain {} has no swap contract address", name);
                }
                _ => {}
            }
            if chain.backend == BackendKind::Etherscan && chain.api_key().is_none() {
                tracing::warn!("Chain {} has no API key - requests may be throttled", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
