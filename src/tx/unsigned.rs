//! Unsigned transactions handed to an external signer

use crate::codec::script;
use crate::contract::Secret;
use crate::error::{SwapError, SwapResult};

use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode;
use bitcoin::transaction::Version;
use bitcoin::{OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness};
use ethers::types::transaction::eip2718::TypedTransaction;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::str::FromStr;

/// Outpoint of the hex transaction id shown by explorers
pub fn outpoint(tx_id: &str, vout: u32) -> SwapResult<OutPoint> {
    let txid = Txid::from_str(tx_id)
        .map_err(|e| SwapError::Codec(format!("transaction id {}: {}", tx_id, e)))?;
    Ok(OutPoint::new(txid, vout))
}

/// Input carrying the script the signer commits to in its scriptSig slot until signed
pub fn unsigned_input(previous_output: OutPoint, script_code: ScriptBuf, sequence: Sequence) -> TxIn {
    TxIn {
        previous_output,
        script_sig: script_code,
        sequence,
        witness: Witness::default(),
    }
}

/// How a spend of an HTLC output must be unlocked once signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtlcUnlock {
    Redeem { secret: Secret, contract_script: ScriptBuf },
    Refund { contract_script: ScriptBuf },
}

impl HtlcUnlock {
    /// Final scriptSig for the contract input
    pub fn script_sig(&self, signature: &[u8], pubkey: &[u8]) -> SwapResult<ScriptBuf> {
        match self {
            HtlcUnlock::Redeem {
                secret,
                contract_script,
            } => script::redeem_script_sig(signature, pubkey, secret.as_bytes(), contract_script),
            HtlcUnlock::Refund { contract_script } => {
                script::refund_script_sig(signature, pubkey, contract_script)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedUtxoTransaction {
    pub transaction: Transaction,
    /// Present when the first input spends an HTLC output
    pub unlock: Option<HtlcUnlock>,
}

impl UnsignedUtxoTransaction {
    pub fn new(input: Vec<TxIn>, output: Vec<TxOut>, lock_time: LockTime) -> Self {
        Self {
            transaction: Transaction {
                version: Version::ONE,
                lock_time,
                input,
                output,
            },
            unlock: None,
        }
    }

    /// Legacy wire serialization
    pub fn serialize(&self) -> Vec<u8> {
        encode::serialize(&self.transaction)
    }
}

/// Transaction ready for an external signer
#[derive(Debug, Clone)]
pub enum UnsignedTransaction {
    Account(TypedTransaction),
    Utxo(UnsignedUtxoTransaction),
}

impl UnsignedTransaction {
    pub fn raw_hex(&self) -> String {
        match self {
            UnsignedTransaction::Account(tx) => hex::encode(tx.rlp()),
            UnsignedTransaction::Utxo(tx) => hex::encode(tx.serialize()),
        }
    }

    pub fn as_account(&self) -> Option<&TypedTransaction> {
        match self {
            UnsignedTransaction::Account(tx) => Some(tx),
            UnsignedTransaction::Utxo(_) => None,
        }
    }

    pub fn as_utxo(&self) -> Option<&UnsignedUtxoTransaction> {
        match self {
            UnsignedTransaction::Utxo(tx) => Some(tx),
            UnsignedTransaction::Account(_) => None,
        }
    }
}

impl Serialize for UnsignedTransaction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("UnsignedTransaction", 3)?;
        match self {
            UnsignedTransaction::Account(_) => {
                state.serialize_field("model", "account")?;
                state.serialize_field("raw", &self.raw_hex())?;
                state.skip_field("unlock")?;
            }
            UnsignedTransaction::Utxo(tx) => {
                state.serialize_field("model", "utxo")?;
                state.serialize_field("raw", &self.raw_hex())?;
                state.serialize_field("unlock", &tx.unlock)?;
            }
        }
        state.end()
    }
}

impl Serialize for HtlcUnlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("HtlcUnlock", 3)?;
        match self {
            HtlcUnlock::Redeem {
                secret,
                contract_script,
            } => {
                state.serialize_field("branch", "redeem")?;
                state.serialize_field("secret", secret)?;
                state.serialize_field("contract_script", &hex::encode(contract_script.as_bytes()))?;
            }
            HtlcUnlock::Refund { contract_script } => {
                state.serialize_field("branch", "refund")?;
                state.skip_field("secret")?;
                state.serialize_field("contract_script", &hex::encode(contract_script.as_bytes()))?;
            }
        }
        state.end()
    }
}
