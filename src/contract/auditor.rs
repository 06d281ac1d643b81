//! Contract auditing: decode an initiate transaction and classify its stage

use super::{account, utxo};
use super::{ContractReference, LifecycleStage, Secret, SwapContract, TokenRegistry};
use crate::chain::{ChainDataProvider, Resolution};
use crate::config::{ChainParams, LedgerModel};
use crate::error::{SwapError, SwapResult};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Contract with its resolved stage and, once redeemed, the revealed secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedContract {
    pub contract: SwapContract,
    pub secret: Option<Secret>,
}

/// Audits contracts on one chain
pub struct ContractAuditor {
    provider: Arc<dyn ChainDataProvider>,
    params: ChainParams,
    tokens: Arc<TokenRegistry>,
}

impl ContractAuditor {
    pub fn new(
        provider: Arc<dyn ChainDataProvider>,
        params: ChainParams,
        tokens: Arc<TokenRegistry>,
    ) -> Self {
        Self {
            provider,
            params,
            tokens,
        }
    }

    /// Decode the contract created by the referenced transaction.
    ///
    /// The returned contract is `Initiated` (or `Invalid` when it locks nothing);
    /// use [`ContractAuditor::resolve`] to find out what happened to it since.
    pub async fn audit(&self, reference: &ContractReference) -> SwapResult<SwapContract> {
        let tx = self
            .provider
            .get_transaction(&reference.tx_id)
            .await
            .ok_or_else(|| SwapError::TransactionNotFound {
                tx_id: reference.tx_id.clone(),
            })?;

        let contract = match self.params.model {
            LedgerModel::Account => account::decode_initiate(&self.params, &self.tokens, &tx)?,
            LedgerModel::Utxo => {
                let script = reference.contract_script.as_deref().ok_or_else(|| {
                    SwapError::UnsupportedOperation {
                        operation: "audit without contract script".to_string(),
                        symbol: self.params.symbol.clone(),
                    }
                })?;
                utxo::decode_initiate(&self.params, &tx, script)?
            }
        };

        debug!(
            "Audited {} contract {} ({}, {})",
            self.params.symbol,
            contract.contract_address,
            contract.secret_hash,
            contract.lifecycle_stage
        );
        Ok(contract)
    }

    /// Combine on-chain resolution with the time lock
    pub async fn resolve(
        &self,
        contract: SwapContract,
        now: DateTime<Utc>,
    ) -> SwapResult<ResolvedContract> {
        if contract.lifecycle_stage == LifecycleStage::Invalid {
            return Ok(ResolvedContract {
                contract,
                secret: None,
            });
        }

        let resolution = self
            .provider
            .resolve_contract(&contract.contract_address, &contract.secret_hash)
            .await
            .ok_or_else(|| SwapError::BackendUnavailable {
                symbol: self.params.symbol.clone(),
                message: format!("could not resolve contract {}", contract.contract_address),
            })?;

        let resolved = match resolution {
            Resolution::Redeemed(secret) => ResolvedContract {
                contract: contract.with_stage(LifecycleStage::Redeemed),
                secret: Some(secret),
            },
            Resolution::Refunded => ResolvedContract {
                contract: contract.with_stage(LifecycleStage::Refunded),
                secret: None,
            },
            Resolution::Unresolved => {
                let stage = if contract.is_expired(now) {
                    LifecycleStage::Expired
                } else {
                    LifecycleStage::Initiated
                };
                ResolvedContract {
                    contract: contract.with_stage(stage),
                    secret: None,
                }
            }
        };

        info!(
            "{} contract {} is {}",
            self.params.symbol, resolved.contract.contract_address, resolved.contract.lifecycle_stage
        );
        Ok(resolved)
    }

    /// Audit and resolve in one step
    pub async fn inspect(
        &self,
        reference: &ContractReference,
        now: DateTime<Utc>,
    ) -> SwapResult<ResolvedContract> {
        let contract = self.audit(reference).await?;
        self.resolve(contract, now).await
    }
}
