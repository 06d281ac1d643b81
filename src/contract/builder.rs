//! Ledger-model dispatch for building swap transactions

use super::account::AccountContractBuilder;
use super::utxo::UtxoContractBuilder;
use super::{Secret, SecretHash, SwapContract, TokenRegistry};
use crate::chain::UnspentOutput;
use crate::config::{ChainParams, LedgerModel};
use crate::error::{SwapError, SwapResult};
use crate::tx::{FeeParams, TxFee, UnsignedTransaction};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

/// Parameters of a new contract
#[derive(Debug, Clone)]
pub struct InitiateParams {
    pub sender: String,
    pub recipient: String,
    /// Display units of the locked asset
    pub value: Decimal,
    /// Generated together with a fresh secret when absent
    pub secret_hash: Option<SecretHash>,
    pub lock_expiry: DateTime<Utc>,
    /// Lock a registered token instead of the native coin
    pub token_address: Option<String>,
}

/// How an initiate transaction is paid for
#[derive(Debug, Clone)]
pub enum Funding {
    Utxo {
        unspent: Vec<UnspentOutput>,
        fee: Decimal,
    },
    Account(FeeParams),
}

/// Initiate transaction and the swap parameters it commits to
#[derive(Debug, Clone, Serialize)]
pub struct InitiateTransaction {
    pub transaction: UnsignedTransaction,
    /// Only set when the secret was generated here; keep it private until redeeming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    pub secret_hash: SecretHash,
    pub lock_expiry: DateTime<Utc>,
    pub contract_address: String,
    /// Hex HTLC script the counterparty needs to audit a UTXO contract
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_script: Option<String>,
}

/// Builds swap transactions for one chain, whatever its ledger model
pub struct ContractBuilder<'a> {
    params: &'a ChainParams,
    tokens: &'a TokenRegistry,
}

impl<'a> ContractBuilder<'a> {
    pub fn new(params: &'a ChainParams, tokens: &'a TokenRegistry) -> Self {
        Self { params, tokens }
    }

    fn unsupported(&self, operation: &str) -> SwapError {
        SwapError::UnsupportedOperation {
            operation: operation.to_string(),
            symbol: self.params.symbol.clone(),
        }
    }

    pub fn initiate(
        &self,
        request: InitiateParams,
        funding: Funding,
    ) -> SwapResult<InitiateTransaction> {
        let (secret, secret_hash) = match request.secret_hash {
            Some(hash) => (None, hash),
            None => {
                let secret = Secret::generate();
                (Some(secret), secret.hash())
            }
        };

        let (transaction, contract_address, contract_script) = match (self.params.model, funding) {
            (LedgerModel::Utxo, Funding::Utxo { unspent, fee }) => {
                if request.token_address.is_some() {
                    return Err(self.unsupported("token swap"));
                }
                let built = UtxoContractBuilder::new(self.params)?.initiate(
                    &request.sender,
                    &request.recipient,
                    request.value,
                    &secret_hash,
                    request.lock_expiry,
                    &unspent,
                    fee,
                )?;
                (
                    UnsignedTransaction::Utxo(built.transaction),
                    built.contract_address,
                    Some(hex::encode(built.contract_script.as_bytes())),
                )
            }
            (LedgerModel::Account, Funding::Account(fee)) => {
                let (tx, contract_address) = AccountContractBuilder::new(self.params, self.tokens)
                    .initiate(
                        &request.sender,
                        &request.recipient,
                        request.value,
                        &secret_hash,
                        request.lock_expiry,
                        request.token_address.as_deref(),
                        &fee,
                    )?;
                (UnsignedTransaction::Account(tx), contract_address, None)
            }
            _ => return Err(self.unsupported("funding for another ledger model")),
        };

        info!(
            "Initiated {} contract {} locked until {}",
            self.params.symbol, contract_address, request.lock_expiry
        );

        Ok(InitiateTransaction {
            transaction,
            secret,
            secret_hash,
            lock_expiry: request.lock_expiry,
            contract_address,
            contract_script,
        })
    }

    pub fn approve_token(
        &self,
        sender: &str,
        value: Decimal,
        token_address: &str,
        fee: &FeeParams,
    ) -> SwapResult<UnsignedTransaction> {
        match self.params.model {
            LedgerModel::Account => AccountContractBuilder::new(self.params, self.tokens)
                .approve_token(sender, value, token_address, fee)
                .map(UnsignedTransaction::Account),
            LedgerModel::Utxo => Err(self.unsupported("token approval")),
        }
    }

    pub fn redeem(
        &self,
        contract: &SwapContract,
        secret: &Secret,
        fee: &TxFee,
    ) -> SwapResult<UnsignedTransaction> {
        match (self.params.model, fee) {
            (LedgerModel::Utxo, TxFee::Utxo(fee)) => UtxoContractBuilder::new(self.params)?
                .redeem(contract, secret, *fee)
                .map(UnsignedTransaction::Utxo),
            (LedgerModel::Account, TxFee::Account(fee)) => {
                AccountContractBuilder::new(self.params, self.tokens)
                    .redeem(contract, secret, fee)
                    .map(UnsignedTransaction::Account)
            }
            _ => Err(self.unsupported("fee for another ledger model")),
        }
    }

    /// Refund an expired contract
    ///
    /// `reference_time` is what the lock is checked against: the chain's
    /// median time past on UTXO chains, wall-clock time on account chains.
    pub fn refund(
        &self,
        contract: &SwapContract,
        reference_time: DateTime<Utc>,
        fee: &TxFee,
    ) -> SwapResult<UnsignedTransaction> {
        match (self.params.model, fee) {
            (LedgerModel::Utxo, TxFee::Utxo(fee)) => UtxoContractBuilder::new(self.params)?
                .refund(contract, reference_time, *fee)
                .map(UnsignedTransaction::Utxo),
            (LedgerModel::Account, TxFee::Account(fee)) => {
                AccountContractBuilder::new(self.params, self.tokens)
                    .refund(contract, reference_time, fee)
                    .map(UnsignedTransaction::Account)
            }
            _ => Err(self.unsupported("fee for another ledger model")),
        }
    }
}
