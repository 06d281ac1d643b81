//! UTXO-model swap contracts: P2SH-funded HTLC scripts

use super::{Asset, ContractLocation, LifecycleStage, Secret, SecretHash, SwapContract};
use crate::chain::{ChainTransaction, UnspentOutput};
use crate::codec::address::AddressKind;
use crate::codec::script::{p2pkh_script, p2sh_script};
use crate::codec::{Base58Codec, HtlcTemplate};
use crate::config::ChainParams;
use crate::error::{SwapError, SwapResult};
use crate::tx::unsigned::{outpoint, unsigned_input};
use crate::tx::{Amount, HtlcUnlock, Scale, UnsignedUtxoTransaction};

use bitcoin::absolute::LockTime;
use bitcoin::{Script, ScriptBuf, Sequence, TxOut};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tracing::debug;

/// Initiate transaction plus what the counterparty needs to audit it
#[derive(Debug, Clone)]
pub struct UtxoInitiate {
    pub transaction: UnsignedUtxoTransaction,
    pub contract_script: ScriptBuf,
    /// P2SH address of the contract script
    pub contract_address: String,
}

pub struct UtxoContractBuilder<'a> {
    params: &'a ChainParams,
    codec: Base58Codec,
    scale: Scale,
}

impl<'a> UtxoContractBuilder<'a> {
    pub fn new(params: &'a ChainParams) -> SwapResult<Self> {
        let prefixes = params.base58.ok_or_else(|| {
            SwapError::Config(format!("{} has no base58 prefixes", params.symbol))
        })?;
        Ok(Self {
            params,
            codec: Base58Codec::new(prefixes),
            scale: Scale::new(params.decimals),
        })
    }

    /// Fund a fresh HTLC from `unspent`, returning change to the sender
    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &self,
        sender: &str,
        recipient: &str,
        value: Decimal,
        secret_hash: &SecretHash,
        lock_expiry: DateTime<Utc>,
        unspent: &[UnspentOutput],
        fee: Decimal,
    ) -> SwapResult<UtxoInitiate> {
        let sender_pkh = self.codec.pubkey_hash(sender)?;
        let template = HtlcTemplate {
            secret_hash: *secret_hash.as_bytes(),
            recipient_pkh: self.codec.pubkey_hash(recipient)?,
            sender_pkh,
            lock_time: lock_time_of(lock_expiry)?,
        };
        let contract_script = template.to_script();
        let script_hash = template.script_hash();

        let value = Amount::from_decimal(value, self.scale)?;
        let need = value.checked_add(Amount::from_decimal(fee, self.scale)?)?;
        let mut found = Amount::zero(self.scale);
        let mut inputs = Vec::with_capacity(unspent.len());
        for output in unspent {
            found = found.checked_add(Amount::from_decimal(output.value, self.scale)?)?;
            let locking_script = hex::decode(&output.locking_script)
                .map_err(|e| SwapError::Codec(format!("locking script: {}", e)))?;
            inputs.push(unsigned_input(
                outpoint(&output.transaction_id, output.output_index)?,
                ScriptBuf::from_bytes(locking_script),
                Sequence::MAX,
            ));
        }

        let change = found
            .checked_sub(need)?
            .ok_or_else(|| SwapError::InsufficientFunds {
                found: found.to_string(),
                need: need.to_string(),
            })?;

        let mut outputs = vec![TxOut {
            value: bitcoin::Amount::from_sat(value.to_u64()?),
            script_pubkey: p2sh_script(&script_hash),
        }];
        if !change.units().is_zero() {
            outputs.push(TxOut {
                value: bitcoin::Amount::from_sat(change.to_u64()?),
                script_pubkey: p2pkh_script(&sender_pkh),
            });
        }

        let contract_address = self.codec.encode(AddressKind::ScriptHash, &script_hash);
        debug!(
            "Built {} initiate locking {} into {}",
            self.params.symbol, value, contract_address
        );

        Ok(UtxoInitiate {
            transaction: UnsignedUtxoTransaction::new(inputs, outputs, LockTime::ZERO),
            contract_script,
            contract_address,
        })
    }

    /// Spend the contract output to the recipient by revealing `secret`
    pub fn redeem(
        &self,
        contract: &SwapContract,
        secret: &Secret,
        fee: Decimal,
    ) -> SwapResult<UnsignedUtxoTransaction> {
        contract.secret_hash.verify(secret)?;
        let (script, output_index, template) = self.htlc_of(contract)?;

        let mut tx = self.spend(
            contract,
            output_index,
            script,
            &template.recipient_pkh,
            fee,
            LockTime::ZERO,
            Sequence::MAX,
        )?;
        tx.unlock = Some(HtlcUnlock::Redeem {
            secret: *secret,
            contract_script: script.to_owned(),
        });
        Ok(tx)
    }

    /// Spend the contract output back to the sender
    ///
    /// `chain_time` is the chain's median time past. Nodes only accept the
    /// spend once it is strictly later than the script locktime, so the
    /// refund is refused locally until then.
    pub fn refund(
        &self,
        contract: &SwapContract,
        chain_time: DateTime<Utc>,
        fee: Decimal,
    ) -> SwapResult<UnsignedUtxoTransaction> {
        if chain_time <= contract.lock_expiry {
            return Err(SwapError::ContractNotExpired {
                expiry: contract.lock_expiry,
            });
        }
        let (script, output_index, template) = self.htlc_of(contract)?;

        let mut tx = self.spend(
            contract,
            output_index,
            script,
            &template.sender_pkh,
            fee,
            template.lock_time,
            Sequence::ENABLE_LOCKTIME_NO_RBF,
        )?;
        tx.unlock = Some(HtlcUnlock::Refund {
            contract_script: script.to_owned(),
        });
        Ok(tx)
    }

    fn htlc_of<'c>(&self, contract: &'c SwapContract) -> SwapResult<(&'c Script, u32, HtlcTemplate)> {
        match &contract.location {
            ContractLocation::Utxo {
                script,
                output_index,
            } => {
                let script = Script::from_bytes(script);
                let template = HtlcTemplate::from_script(script)
                    .ok_or_else(|| SwapError::NotAContractTransaction(contract.transaction_id.clone()))?;
                Ok((script, *output_index, template))
            }
            ContractLocation::Account => Err(SwapError::UnsupportedOperation {
                operation: "account contract spend".to_string(),
                symbol: self.params.symbol.clone(),
            }),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn spend(
        &self,
        contract: &SwapContract,
        output_index: u32,
        script: &Script,
        payee_pkh: &[u8; 20],
        fee: Decimal,
        lock_time: LockTime,
        sequence: Sequence,
    ) -> SwapResult<UnsignedUtxoTransaction> {
        let locked = Amount::new(contract.value, self.scale);
        let fee = Amount::from_decimal(fee, self.scale)?;
        let payout = locked
            .checked_sub(fee)?
            .filter(|payout| !payout.units().is_zero())
            .ok_or_else(|| SwapError::InsufficientFunds {
                found: locked.to_string(),
                need: fee.to_string(),
            })?;

        let input = unsigned_input(
            outpoint(&contract.transaction_id, output_index)?,
            script.to_owned(),
            sequence,
        );
        let output = TxOut {
            value: bitcoin::Amount::from_sat(payout.to_u64()?),
            script_pubkey: p2pkh_script(payee_pkh),
        };
        Ok(UnsignedUtxoTransaction::new(vec![input], vec![output], lock_time))
    }
}

fn lock_time_of(lock_expiry: DateTime<Utc>) -> SwapResult<LockTime> {
    u32::try_from(lock_expiry.timestamp())
        .ok()
        .and_then(|timestamp| LockTime::from_time(timestamp).ok())
        .ok_or_else(|| SwapError::Codec(format!("expiry {} is not a valid locktime", lock_expiry)))
}

/// Decode the contract funded by `tx` from its HTLC script
pub fn decode_initiate(
    params: &ChainParams,
    tx: &ChainTransaction,
    contract_script: &str,
) -> SwapResult<SwapContract> {
    let prefixes = params.base58.ok_or_else(|| {
        SwapError::Config(format!("{} has no base58 prefixes", params.symbol))
    })?;
    let codec = Base58Codec::new(prefixes);

    let script = hex::decode(contract_script.trim_start_matches("0x"))
        .map(ScriptBuf::from_bytes)
        .map_err(|e| SwapError::Codec(format!("contract script: {}", e)))?;
    let template = HtlcTemplate::from_script(&script)
        .ok_or_else(|| SwapError::NotAContractTransaction(tx.id.clone()))?;
    if template.lock_time.is_block_height() {
        return Err(SwapError::UnsupportedOperation {
            operation: "block height locktime".to_string(),
            symbol: params.symbol.clone(),
        });
    }

    let script_hash = template.script_hash();
    let funding_script = hex::encode(script.to_p2sh().as_bytes());
    let output = tx
        .outputs
        .iter()
        .find(|output| output.locking_script.eq_ignore_ascii_case(&funding_script))
        .ok_or_else(|| SwapError::NotAContractTransaction(tx.id.clone()))?;

    let value = Scale::new(params.decimals).to_base_units(output.value)?;
    let lock_time = template.lock_time.to_consensus_u32();
    let lock_expiry = Utc
        .timestamp_opt(i64::from(lock_time), 0)
        .single()
        .ok_or_else(|| SwapError::Codec(format!("locktime {}", lock_time)))?;
    let lifecycle_stage = if value.is_zero() {
        LifecycleStage::Invalid
    } else {
        LifecycleStage::Initiated
    };

    Ok(SwapContract {
        chain: params.symbol.clone(),
        transaction_id: tx.id.clone(),
        contract_address: codec.encode(AddressKind::ScriptHash, &script_hash),
        lock_expiry,
        recipient_address: codec.encode(AddressKind::PubkeyHash, &template.recipient_pkh),
        refund_address: codec.encode(AddressKind::PubkeyHash, &template.sender_pkh),
        secret_hash: SecretHash::from(template.secret_hash),
        value,
        asset: Asset::Native {
            symbol: params.symbol.clone(),
            decimals: params.decimals,
        },
        lifecycle_stage,
        location: ContractLocation::Utxo {
            script: script.into_bytes(),
            output_index: output.index,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::TxOutput;
    use crate::codec::script::{classify_spend, HtlcSpend};
    use crate::config::{Base58Prefixes, LedgerModel};
    use ethers::types::U256;
    use std::str::FromStr;

    const PREFIXES: Base58Prefixes = Base58Prefixes {
        pubkey_addr: 0,
        script_addr: 5,
    };

    fn params() -> ChainParams {
        ChainParams {
            symbol: "BTC".to_string(),
            model: LedgerModel::Utxo,
            decimals: 8,
            base58: Some(PREFIXES),
            chain_id: None,
            contract_address: None,
            token_contract_address: None,
        }
    }

    fn address(byte: u8) -> String {
        Base58Codec::new(PREFIXES).encode(AddressKind::PubkeyHash, &[byte; 20])
    }

    fn unspent(tx_byte: &str, value: &str) -> UnspentOutput {
        UnspentOutput {
            transaction_id: tx_byte.repeat(32),
            output_index: 1,
            value: Decimal::from_str(value).unwrap(),
            locking_script: hex::encode(p2pkh_script(&[0x11; 20]).as_bytes()),
        }
    }

    fn expiry() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2018, 3, 30, 11, 56, 26).unwrap()
    }

    /// Backend view of an initiate transaction
    fn observed(initiate: &UtxoInitiate) -> ChainTransaction {
        ChainTransaction {
            id: "ab".repeat(32),
            inputs: vec![],
            outputs: initiate
                .transaction
                .transaction
                .output
                .iter()
                .enumerate()
                .map(|(index, output)| TxOutput {
                    index: index as u32,
                    value: Scale::new(8)
                        .from_base_units(U256::from(output.value.to_sat()))
                        .unwrap(),
                    locking_script: hex::encode(output.script_pubkey.as_bytes()),
                    spent_by: None,
                })
                .collect(),
            block_hash: None,
            block_height: None,
            call: None,
        }
    }

    fn initiated(secret: &Secret) -> (UtxoInitiate, SwapContract) {
        let params = params();
        let builder = UtxoContractBuilder::new(&params).unwrap();
        let initiate = builder
            .initiate(
                &address(0x11),
                &address(0x22),
                Decimal::from_str("0.5").unwrap(),
                &secret.hash(),
                expiry(),
                &[unspent("01", "0.4"), unspent("02", "0.3")],
                Decimal::from_str("0.0001").unwrap(),
            )
            .unwrap();
        let script = hex::encode(initiate.contract_script.as_bytes());
        let contract = decode_initiate(&params, &observed(&initiate), &script).unwrap();
        (initiate, contract)
    }

    #[test]
    fn test_initiate_funds_p2sh_with_change() {
        let secret = Secret::from([0x5a; 32]);
        let (initiate, _) = initiated(&secret);
        let tx = &initiate.transaction.transaction;

        assert_eq!(tx.input.len(), 2);
        assert!(tx.input.iter().all(|input| input.sequence == Sequence::MAX));
        assert_eq!(tx.output[0].value.to_sat(), 50_000_000);
        assert_eq!(tx.output[0].script_pubkey, initiate.contract_script.to_p2sh());
        // 0.7 in, 0.5 locked, 0.0001 fee
        assert_eq!(tx.output[1].value.to_sat(), 19_990_000);
        assert_eq!(tx.output[1].script_pubkey, p2pkh_script(&[0x11; 20]));
        assert_eq!(tx.lock_time, LockTime::ZERO);
        assert!(initiate.contract_address.starts_with('3'));
    }

    #[test]
    fn test_audit_recovers_parameters() {
        let secret = Secret::from([0x5a; 32]);
        let (initiate, contract) = initiated(&secret);

        assert_eq!(contract.contract_address, initiate.contract_address);
        assert_eq!(contract.secret_hash, secret.hash());
        assert_eq!(contract.lock_expiry, expiry());
        assert_eq!(contract.recipient_address, address(0x22));
        assert_eq!(contract.refund_address, address(0x11));
        assert_eq!(contract.value, U256::from(50_000_000));
        assert_eq!(contract.lifecycle_stage, LifecycleStage::Initiated);
        assert_eq!(contract.show_details().value_text, "0.50000000 BTC");
    }

    #[test]
    fn test_insufficient_funds() {
        let params = params();
        let builder = UtxoContractBuilder::new(&params).unwrap();
        let err = builder
            .initiate(
                &address(0x11),
                &address(0x22),
                Decimal::from_str("0.7").unwrap(),
                &Secret::from([1u8; 32]).hash(),
                expiry(),
                &[unspent("01", "0.4"), unspent("02", "0.3")],
                Decimal::from_str("0.0001").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, SwapError::InsufficientFunds { .. }));
    }

    #[test]
    fn test_script_mismatch_is_not_a_contract() {
        let secret = Secret::from([0x5a; 32]);
        let (initiate, _) = initiated(&secret);
        let other = HtlcTemplate {
            secret_hash: [0x77; 20],
            recipient_pkh: [0x22; 20],
            sender_pkh: [0x11; 20],
            lock_time: LockTime::from_consensus(1_522_410_986),
        };

        let other_script = hex::encode(other.to_script().as_bytes());
        let err = decode_initiate(&params(), &observed(&initiate), &other_script).unwrap_err();
        assert!(matches!(err, SwapError::NotAContractTransaction(_)));

        let err = decode_initiate(&params(), &observed(&initiate), "76a914").unwrap_err();
        assert!(matches!(err, SwapError::NotAContractTransaction(_)));
    }

    #[test]
    fn test_redeem_spends_contract_output() {
        let secret = Secret::from([0x5a; 32]);
        let (initiate, contract) = initiated(&secret);
        let params = params();
        let builder = UtxoContractBuilder::new(&params).unwrap();

        let tx = builder
            .redeem(&contract, &secret, Decimal::from_str("0.0001").unwrap())
            .unwrap();
        let spend = &tx.transaction;
        assert_eq!(spend.input[0].previous_output, outpoint(&"ab".repeat(32), 0).unwrap());
        assert_eq!(spend.input[0].script_sig, initiate.contract_script);
        assert_eq!(spend.output[0].value.to_sat(), 49_990_000);
        assert_eq!(spend.output[0].script_pubkey, p2pkh_script(&[0x22; 20]));
        assert_eq!(spend.lock_time, LockTime::ZERO);

        let script_sig = tx.unlock.unwrap().script_sig(&[0x30; 71], &[0x02; 33]).unwrap();
        let (spend, template) = classify_spend(&script_sig).unwrap();
        assert_eq!(template.to_script(), initiate.contract_script);
        assert!(matches!(spend, HtlcSpend::Redeem { .. }));

        let err = builder
            .redeem(&contract, &Secret::from([0u8; 32]), Decimal::ZERO)
            .unwrap_err();
        assert!(matches!(err, SwapError::SecretMismatch { .. }));
    }

    #[test]
    fn test_refund_waits_for_chain_time() {
        let secret = Secret::from([0x5a; 32]);
        let (_, contract) = initiated(&secret);
        let params = params();
        let builder = UtxoContractBuilder::new(&params).unwrap();
        let fee = Decimal::from_str("0.0001").unwrap();

        let err = builder
            .refund(&contract, expiry() - chrono::Duration::minutes(1), fee)
            .unwrap_err();
        assert!(matches!(err, SwapError::ContractNotExpired { .. }));

        // a locktime equal to the median time past is not final yet
        let err = builder.refund(&contract, expiry(), fee).unwrap_err();
        assert!(matches!(err, SwapError::ContractNotExpired { .. }));

        let tx = builder
            .refund(&contract, expiry() + chrono::Duration::seconds(1), fee)
            .unwrap();
        let spend = &tx.transaction;
        assert_eq!(spend.lock_time, LockTime::from_consensus(1_522_410_986));
        assert_eq!(spend.input[0].sequence, Sequence::ENABLE_LOCKTIME_NO_RBF);
        assert_eq!(spend.output[0].script_pubkey, p2pkh_script(&[0x11; 20]));
        assert!(matches!(tx.unlock, Some(HtlcUnlock::Refund { .. })));
    }

    #[test]
    fn test_block_height_locktime_is_unsupported() {
        let secret = Secret::from([0x5a; 32]);
        let (initiate, _) = initiated(&secret);
        let by_height = HtlcTemplate {
            secret_hash: *secret.hash().as_bytes(),
            recipient_pkh: [0x22; 20],
            sender_pkh: [0x11; 20],
            lock_time: LockTime::from_consensus(600_000),
        };

        let script = hex::encode(by_height.to_script().as_bytes());
        let err = decode_initiate(&params(), &observed(&initiate), &script).unwrap_err();
        assert!(matches!(err, SwapError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_fee_larger_than_contract() {
        let secret = Secret::from([0x5a; 32]);
        let (_, contract) = initiated(&secret);
        let params = params();
        let builder = UtxoContractBuilder::new(&params).unwrap();

        let err = builder
            .redeem(&contract, &secret, Decimal::from_str("0.5").unwrap())
            .unwrap_err();
        assert!(matches!(err, SwapError::InsufficientFunds { .. }));
    }
}
