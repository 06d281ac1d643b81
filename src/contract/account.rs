//! Account-model swap contracts: call building and initiate decoding

use super::{Asset, ContractLocation, LifecycleStage, Secret, SecretHash, SwapContract, TokenRegistry};
use crate::chain::ChainTransaction;
use crate::codec::address::parse_account_address;
use crate::codec::{method_of, SwapCall};
use crate::config::ChainParams;
use crate::error::{SwapError, SwapResult};
use crate::tx::{FeeParams, Scale};

use chrono::{DateTime, TimeZone, Utc};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, U256};
use ethers::utils::to_checksum;
use rust_decimal::Decimal;
use tracing::debug;

/// Builds calls against the shared swap contracts of one chain
pub struct AccountContractBuilder<'a> {
    params: &'a ChainParams,
    tokens: &'a TokenRegistry,
}

impl<'a> AccountContractBuilder<'a> {
    pub fn new(params: &'a ChainParams, tokens: &'a TokenRegistry) -> Self {
        Self { params, tokens }
    }

    fn swap_contract(&self) -> SwapResult<Address> {
        let address = self.params.contract_address.as_deref().ok_or_else(|| {
            SwapError::Config(format!("{} has no swap contract", self.params.symbol))
        })?;
        parse_account_address(address)
    }

    fn token_swap_contract(&self) -> SwapResult<Address> {
        let address = self.params.token_contract_address.as_deref().ok_or_else(|| {
            SwapError::Config(format!("{} has no token swap contract", self.params.symbol))
        })?;
        parse_account_address(address)
    }

    fn request(
        &self,
        from: Address,
        to: Address,
        value: U256,
        call: &SwapCall,
        fee: &FeeParams,
    ) -> TypedTransaction {
        let mut request = TransactionRequest::new()
            .from(from)
            .to(to)
            .value(value)
            .data(Bytes::from(call.encode()))
            .nonce(fee.nonce)
            .gas(fee.gas_limit)
            .gas_price(fee.gas_price);
        if let Some(chain_id) = self.params.chain_id {
            request = request.chain_id(chain_id);
        }
        debug!("Built {} call to {:?} on {}", call.method().name(), to, self.params.symbol);
        request.into()
    }

    /// Initiate call locking native coin, or a registered token when `token_address` is set.
    /// Returns the transaction and the checksummed address of the contract it calls.
    #[allow(clippy::too_many_arguments)]
    pub fn initiate(
        &self,
        sender: &str,
        recipient: &str,
        value: Decimal,
        secret_hash: &SecretHash,
        lock_expiry: DateTime<Utc>,
        token_address: Option<&str>,
        fee: &FeeParams,
    ) -> SwapResult<(TypedTransaction, String)> {
        let from = parse_account_address(sender)?;
        let participant = parse_account_address(recipient)?;
        let expiration = expiration_of(lock_expiry)?;
        let secret_hash = *secret_hash.as_bytes();

        let (to, call, native_value) = match token_address {
            None => {
                let value = Scale::new(self.params.decimals).to_base_units(value)?;
                let call = SwapCall::Initiate {
                    expiration,
                    secret_hash,
                    participant,
                };
                (self.swap_contract()?, call, value)
            }
            Some(token_address) => {
                let token = self.tokens.require(token_address)?;
                let call = SwapCall::InitiateToken {
                    expiration,
                    secret_hash,
                    participant,
                    token: parse_account_address(&token.address)?,
                    value: Scale::new(token.decimals).to_base_units(value)?,
                };
                (self.token_swap_contract()?, call, U256::zero())
            }
        };

        let transaction = self.request(from, to, native_value, &call, fee);
        Ok((transaction, to_checksum(&to, None)))
    }

    /// Allowance the token swap contract needs before a token initiate
    pub fn approve_token(
        &self,
        sender: &str,
        value: Decimal,
        token_address: &str,
        fee: &FeeParams,
    ) -> SwapResult<TypedTransaction> {
        let from = parse_account_address(sender)?;
        let token = self.tokens.require(token_address)?;
        let call = SwapCall::Approve {
            spender: self.token_swap_contract()?,
            value: Scale::new(token.decimals).to_base_units(value)?,
        };
        let to = parse_account_address(&token.address)?;
        Ok(self.request(from, to, U256::zero(), &call, fee))
    }

    pub fn redeem(
        &self,
        contract: &SwapContract,
        secret: &Secret,
        fee: &FeeParams,
    ) -> SwapResult<TypedTransaction> {
        contract.secret_hash.verify(secret)?;
        let from = parse_account_address(&contract.recipient_address)?;
        let to = parse_account_address(&contract.contract_address)?;
        let call = SwapCall::Redeem {
            secret: *secret.as_bytes(),
        };
        Ok(self.request(from, to, U256::zero(), &call, fee))
    }

    /// Refund call, refused locally until the lock has expired
    pub fn refund(
        &self,
        contract: &SwapContract,
        now: DateTime<Utc>,
        fee: &FeeParams,
    ) -> SwapResult<TypedTransaction> {
        if !contract.is_expired(now) {
            return Err(SwapError::ContractNotExpired {
                expiry: contract.lock_expiry,
            });
        }
        let from = parse_account_address(&contract.refund_address)?;
        let to = parse_account_address(&contract.contract_address)?;
        let call = SwapCall::Refund {
            secret_hash: *contract.secret_hash.as_bytes(),
        };
        Ok(self.request(from, to, U256::zero(), &call, fee))
    }
}

fn expiration_of(lock_expiry: DateTime<Utc>) -> SwapResult<U256> {
    u64::try_from(lock_expiry.timestamp())
        .map(U256::from)
        .map_err(|_| SwapError::Codec(format!("expiry {} predates the epoch", lock_expiry)))
}

fn expiry_from(expiration: U256) -> SwapResult<DateTime<Utc>> {
    u64::try_from(expiration)
        .ok()
        .and_then(|seconds| i64::try_from(seconds).ok())
        .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single())
        .ok_or_else(|| SwapError::Codec(format!("expiration {} out of range", expiration)))
}

/// Decode an initiate call into a contract view
pub fn decode_initiate(
    params: &ChainParams,
    tokens: &TokenRegistry,
    tx: &ChainTransaction,
) -> SwapResult<SwapContract> {
    let not_a_contract = || SwapError::NotAContractTransaction(tx.id.clone());

    let call = tx.call.as_ref().ok_or_else(not_a_contract)?;
    if !method_of(&call.input).map_or(false, |method| method.is_initiate()) {
        return Err(not_a_contract());
    }
    let to = call.to.ok_or_else(not_a_contract)?;

    let (expiration, secret_hash, participant, asset, value) = match SwapCall::decode(&call.input)? {
        SwapCall::Initiate {
            expiration,
            secret_hash,
            participant,
        } => {
            let asset = Asset::Native {
                symbol: params.symbol.clone(),
                decimals: params.decimals,
            };
            (expiration, secret_hash, participant, asset, call.value)
        }
        SwapCall::InitiateToken {
            expiration,
            secret_hash,
            participant,
            token,
            value,
        } => {
            let token = tokens.require(&to_checksum(&token, None))?.clone();
            (expiration, secret_hash, participant, Asset::Token(token), value)
        }
        _ => return Err(not_a_contract()),
    };

    let lifecycle_stage = if value.is_zero() {
        LifecycleStage::Invalid
    } else {
        LifecycleStage::Initiated
    };

    Ok(SwapContract {
        chain: params.symbol.clone(),
        transaction_id: tx.id.clone(),
        contract_address: to_checksum(&to, None),
        lock_expiry: expiry_from(expiration)?,
        recipient_address: to_checksum(&participant, None),
        refund_address: to_checksum(&call.from, None),
        secret_hash: SecretHash::from(secret_hash),
        value,
        asset,
        lifecycle_stage,
        location: ContractLocation::Account,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CallPayload;
    use crate::config::LedgerModel;
    use crate::contract::fixtures::*;
    use std::str::FromStr;

    fn params() -> ChainParams {
        ChainParams {
            symbol: "ETH".to_string(),
            model: LedgerModel::Account,
            decimals: 18,
            base58: None,
            chain_id: Some(3),
            contract_address: Some(CONTRACT.to_string()),
            token_contract_address: Some(TOKEN_CONTRACT.to_string()),
        }
    }

    fn tokens() -> TokenRegistry {
        TokenRegistry::new(vec![bbt()])
    }

    fn fee() -> FeeParams {
        FeeParams {
            nonce: U256::from(3),
            gas_price: U256::from(1_000_000_000u64),
            gas_limit: U256::from(200_000),
        }
    }

    fn secret_hash() -> SecretHash {
        SECRET_HASH.parse().unwrap()
    }

    fn transaction(tx: &TypedTransaction, id: &str) -> ChainTransaction {
        ChainTransaction {
            id: id.to_string(),
            inputs: vec![],
            outputs: vec![],
            block_hash: None,
            block_height: None,
            call: Some(CallPayload {
                from: *tx.from().unwrap(),
                to: tx.to().and_then(|to| to.as_address().copied()),
                value: tx.value().copied().unwrap_or_default(),
                input: tx.data().map(|d| d.to_vec()).unwrap_or_default(),
            }),
        }
    }

    #[test]
    fn test_initiated_ether_contract_audits_back() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);

        let (tx, contract_address) = builder
            .initiate(
                REFUND,
                RECIPIENT,
                Decimal::from_str("0.000000000000000012").unwrap(),
                &secret_hash(),
                expiry(),
                None,
                &fee(),
            )
            .unwrap();
        assert_eq!(contract_address, CONTRACT);
        assert_eq!(tx.value(), Some(&U256::from(12)));
        assert_eq!(tx.chain_id().map(|id| id.as_u64()), Some(3));

        let contract = decode_initiate(&params, &tokens, &transaction(&tx, INITIATE_TX)).unwrap();
        assert_eq!(contract, ether_contract());
    }

    #[test]
    fn test_token_contract_audits_back() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);
        let locktime = Utc.with_ymd_and_hms(2018, 4, 1, 14, 8, 36).unwrap();
        let hash: SecretHash = "06821b98736162c1b007155e818536ec5fd57950".parse().unwrap();

        let (tx, contract_address) = builder
            .initiate(
                REFUND,
                RECIPIENT,
                Decimal::from_str("0.0000000000000001").unwrap(),
                &hash,
                locktime,
                Some(&BBT.to_lowercase()),
                &fee(),
            )
            .unwrap();
        assert_eq!(contract_address, TOKEN_CONTRACT);
        assert_eq!(tx.value(), Some(&U256::zero()));

        let contract = decode_initiate(&params, &tokens, &transaction(&tx, "0xabc")).unwrap();
        assert_eq!(contract.value, U256::from(100));
        assert_eq!(contract.lock_expiry, locktime);
        assert_eq!(contract.asset, Asset::Token(bbt()));
        assert_eq!(contract.show_details().token_address.as_deref(), Some(BBT));
    }

    #[test]
    fn test_unregistered_token_is_unknown_asset() {
        let params = params();
        let tokens = tokens();
        let call = SwapCall::InitiateToken {
            expiration: U256::from(expiry().timestamp()),
            secret_hash: *secret_hash().as_bytes(),
            participant: Address::from_str(RECIPIENT).unwrap(),
            token: Address::from_low_u64_be(0xdead),
            value: U256::from(100),
        };
        let tx = ChainTransaction {
            id: "0xabc".to_string(),
            inputs: vec![],
            outputs: vec![],
            block_hash: None,
            block_height: None,
            call: Some(CallPayload {
                from: Address::from_str(REFUND).unwrap(),
                to: Some(Address::from_str(TOKEN_CONTRACT).unwrap()),
                value: U256::zero(),
                input: call.encode(),
            }),
        };

        let err = decode_initiate(&params, &tokens, &tx).unwrap_err();
        assert!(matches!(err, SwapError::UnknownAsset(_)));

        let builder = AccountContractBuilder::new(&params, &tokens);
        assert!(matches!(
            builder.approve_token(REFUND, Decimal::ONE, "0x000000000000000000000000000000000000dead", &fee()),
            Err(SwapError::UnknownAsset(_))
        ));
    }

    #[test]
    fn test_non_initiate_call_is_not_a_contract() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);
        let secret = Secret::from([9u8; 32]);
        let contract = SwapContract {
            secret_hash: secret.hash(),
            ..ether_contract()
        };

        let redeem = builder.redeem(&contract, &secret, &fee()).unwrap();
        let err = decode_initiate(&params, &tokens, &transaction(&redeem, "0x1")).unwrap_err();
        assert!(matches!(err, SwapError::NotAContractTransaction(_)));
    }

    #[test]
    fn test_zero_value_initiate_is_invalid() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);
        let (tx, _) = builder
            .initiate(REFUND, RECIPIENT, Decimal::ZERO, &secret_hash(), expiry(), None, &fee())
            .unwrap();

        let contract = decode_initiate(&params, &tokens, &transaction(&tx, "0x2")).unwrap();
        assert_eq!(contract.lifecycle_stage, LifecycleStage::Invalid);
    }

    #[test]
    fn test_redeem_rejects_wrong_secret() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);

        let err = builder
            .redeem(&ether_contract(), &Secret::from([1u8; 32]), &fee())
            .unwrap_err();
        assert!(matches!(err, SwapError::SecretMismatch { .. }));
    }

    #[test]
    fn test_refund_guarded_by_expiry() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);
        let contract = ether_contract();

        let err = builder
            .refund(&contract, expiry() - chrono::Duration::hours(1), &fee())
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "This contract is still valid! It can't be refunded until 2018-03-30 11:56:26 UTC."
        );

        let tx = builder.refund(&contract, expiry(), &fee()).unwrap();
        assert_eq!(
            format!("0x{}", hex::encode(tx.data().unwrap())),
            "0x5a8f9b8110ff972f3d8181f603aa7f6b4bc172de730fec2b000000000000000000000000"
        );
        assert_eq!(tx.from(), Some(&Address::from_str(REFUND).unwrap()));
    }

    #[test]
    fn test_approve_targets_token() {
        let params = params();
        let tokens = tokens();
        let builder = AccountContractBuilder::new(&params, &tokens);

        let tx = builder.approve_token(REFUND, Decimal::ONE, BBT, &fee()).unwrap();
        assert_eq!(
            tx.to().and_then(|to| to.as_address().copied()),
            Some(Address::from_str(BBT).unwrap())
        );
        assert_eq!(&tx.data().unwrap()[..4], &[0x09, 0x5e, 0xa7, 0xb3]);
    }
}
