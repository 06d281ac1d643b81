//! Swap lifecycle controller driving both legs of a cross-chain swap

use crate::chain::{ChainHandle, ChainRegistry};
use crate::config::{LedgerModel, SwapConfig};
use crate::contract::{
    ContractAuditor, ContractBuilder, ContractReference, Funding, InitiateParams,
    InitiateTransaction, LifecycleStage, ResolvedContract, Secret, SecretHash, SwapContract,
};
use crate::error::{SwapError, SwapResult};
use crate::tx::{FeeEstimator, TxFee, UnsignedTransaction};

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// One leg of a swap to be funded
#[derive(Debug, Clone)]
pub struct LegRequest {
    pub symbol: String,
    pub sender: String,
    pub recipient: String,
    /// Display units
    pub value: Decimal,
    /// Token contract address or registered symbol
    pub token_address: Option<String>,
}

/// Orchestrates propose, audit, participate, redeem and refund
pub struct SwapController {
    chains: Arc<ChainRegistry>,
    swap: SwapConfig,
    fees: FeeEstimator,
}

impl SwapController {
    pub fn new(chains: Arc<ChainRegistry>, swap: SwapConfig) -> Self {
        Self {
            chains,
            swap,
            fees: FeeEstimator::new(),
        }
    }

    fn auditor(chain: &ChainHandle) -> ContractAuditor {
        ContractAuditor::new(
            chain.provider.clone(),
            chain.params.clone(),
            chain.tokens.clone(),
        )
    }

    /// Open a swap: generate a secret and lock the initiator's leg
    pub async fn propose(&self, leg: LegRequest) -> SwapResult<InitiateTransaction> {
        let lock_expiry = Utc::now() + Duration::hours(self.swap.initiator_lock_hours);
        info!(
            "Proposing swap of {} {} to {}",
            leg.value, leg.symbol, leg.recipient
        );
        self.initiate(leg, None, lock_expiry).await
    }

    /// Audit a contract and resolve its current stage
    pub async fn audit(
        &self,
        symbol: &str,
        reference: &ContractReference,
    ) -> SwapResult<ResolvedContract> {
        let chain = self.chains.get(symbol)?;
        Self::auditor(&chain).inspect(reference, Utc::now()).await
    }

    /// Lock the counter-leg against the counterparty's audited contract
    pub async fn participate(
        &self,
        counterparty_symbol: &str,
        counterparty: &ContractReference,
        leg: LegRequest,
    ) -> SwapResult<InitiateTransaction> {
        let resolved = self.audit(counterparty_symbol, counterparty).await?;
        let contract = resolved.contract;
        ensure_stage(&contract, LifecycleStage::Initiated)?;

        let lock_expiry = Utc::now() + Duration::hours(self.swap.participant_lock_hours);
        if lock_expiry >= contract.lock_expiry {
            warn!(
                "Participant lock {} does not expire before counterparty lock {}",
                lock_expiry, contract.lock_expiry
            );
        }

        info!(
            "Participating in swap {} with {} {}",
            contract.secret_hash, leg.value, leg.symbol
        );
        self.initiate(leg, Some(contract.secret_hash), lock_expiry)
            .await
    }

    /// Claim a contract by revealing the secret
    pub async fn redeem(
        &self,
        symbol: &str,
        reference: &ContractReference,
        secret: &Secret,
    ) -> SwapResult<UnsignedTransaction> {
        let chain = self.chains.get(symbol)?;
        let resolved = Self::auditor(&chain).inspect(reference, Utc::now()).await?;
        let contract = resolved.contract;
        ensure_stage(&contract, LifecycleStage::Initiated)?;

        let fee = self
            .tx_fee(&chain, &contract.recipient_address, self.swap.redeem_gas_limit)
            .await?;
        let tx = ContractBuilder::new(&chain.params, &chain.tokens).redeem(&contract, secret, &fee)?;
        info!("Built redeem of {} contract {}", symbol, contract.contract_address);
        Ok(tx)
    }

    /// Reclaim an expired contract
    ///
    /// UTXO time locks are enforced against the chain's median time past,
    /// which trails the wall clock, so those chains are asked for their time.
    pub async fn refund(
        &self,
        symbol: &str,
        reference: &ContractReference,
    ) -> SwapResult<UnsignedTransaction> {
        let chain = self.chains.get(symbol)?;
        let now = Utc::now();
        let resolved = Self::auditor(&chain).inspect(reference, now).await?;
        let contract = resolved.contract;
        match contract.lifecycle_stage {
            LifecycleStage::Initiated | LifecycleStage::Expired => {}
            stage => return Err(SwapError::ContractNotActive { stage }),
        }

        let reference_time = match chain.params.model {
            LedgerModel::Utxo => chain.provider.latest_block_time().await.ok_or_else(|| {
                SwapError::BackendUnavailable {
                    symbol: chain.params.symbol.clone(),
                    message: "cannot get chain time".to_string(),
                }
            })?,
            LedgerModel::Account => now,
        };

        let fee = self
            .tx_fee(&chain, &contract.refund_address, self.swap.refund_gas_limit)
            .await?;
        let tx = ContractBuilder::new(&chain.params, &chain.tokens).refund(
            &contract,
            reference_time,
            &fee,
        )?;
        info!("Built refund of {} contract {}", symbol, contract.contract_address);
        Ok(tx)
    }

    /// Secret revealed by the redeem of the referenced contract, if it happened yet
    pub async fn extract_secret(
        &self,
        symbol: &str,
        reference: &ContractReference,
    ) -> SwapResult<Option<Secret>> {
        let chain = self.chains.get(symbol)?;
        let contract = Self::auditor(&chain).audit(reference).await?;
        Ok(chain
            .provider
            .extract_secret_from_redeem_transaction(&contract.contract_address, &contract.secret_hash)
            .await)
    }

    /// Secret revealed by a known redeem transaction
    pub async fn secret_from_redeem(&self, symbol: &str, tx_id: &str) -> SwapResult<Secret> {
        let chain = self.chains.get(symbol)?;
        let secret = chain.provider.secret_from_redeem_transaction(tx_id).await?;
        info!("Found secret in {} transaction {}", symbol, tx_id);
        Ok(secret)
    }

    /// Allow the token swap contract to pull `value` from `sender`
    ///
    /// `token` is a contract address or a registered token symbol.
    pub async fn approve_token(
        &self,
        symbol: &str,
        sender: &str,
        value: Decimal,
        token: &str,
    ) -> SwapResult<UnsignedTransaction> {
        let chain = self.chains.get(symbol)?;
        if chain.params.model != LedgerModel::Account {
            return Err(SwapError::UnsupportedOperation {
                operation: "token approval".to_string(),
                symbol: chain.params.symbol.clone(),
            });
        }
        let fee = self
            .fees
            .account_fee_params(chain.provider.as_ref(), sender, self.swap.initiate_gas_limit)
            .await?;
        let token_address = token_address_of(&chain, token)?;
        ContractBuilder::new(&chain.params, &chain.tokens).approve_token(
            sender,
            value,
            &token_address,
            &fee,
        )
    }

    async fn initiate(
        &self,
        leg: LegRequest,
        secret_hash: Option<SecretHash>,
        lock_expiry: DateTime<Utc>,
    ) -> SwapResult<InitiateTransaction> {
        let chain = self.chains.get(&leg.symbol)?;
        let provider = chain.provider.as_ref();
        let token_address = leg
            .token_address
            .as_deref()
            .map(|token| token_address_of(&chain, token))
            .transpose()?;

        let funding = match chain.params.model {
            LedgerModel::Utxo => {
                let fee = self.fees.utxo_fee(provider).await?;
                let need = leg.value + fee;
                match provider.get_unspent_outputs(&leg.sender, need).await? {
                    Some(unspent) => Funding::Utxo { unspent, fee },
                    None => {
                        let found = provider
                            .get_balance(&leg.sender)
                            .await?
                            .unwrap_or_default();
                        return Err(SwapError::InsufficientFunds {
                            found: found.to_string(),
                            need: need.to_string(),
                        });
                    }
                }
            }
            LedgerModel::Account => Funding::Account(
                self.fees
                    .account_fee_params(provider, &leg.sender, self.swap.initiate_gas_limit)
                    .await?,
            ),
        };

        let request = InitiateParams {
            sender: leg.sender,
            recipient: leg.recipient,
            value: leg.value,
            secret_hash,
            lock_expiry,
            token_address,
        };
        ContractBuilder::new(&chain.params, &chain.tokens).initiate(request, funding)
    }

    async fn tx_fee(&self, chain: &ChainHandle, sender: &str, gas_limit: u64) -> SwapResult<TxFee> {
        let provider = chain.provider.as_ref();
        match chain.params.model {
            LedgerModel::Utxo => Ok(TxFee::Utxo(self.fees.utxo_fee(provider).await?)),
            LedgerModel::Account => Ok(TxFee::Account(
                self.fees.account_fee_params(provider, sender, gas_limit).await?,
            )),
        }
    }
}

/// Contract address of a token given by address or registered symbol
fn token_address_of(chain: &ChainHandle, token: &str) -> SwapResult<String> {
    if token.starts_with("0x") {
        return Ok(token.to_string());
    }
    chain
        .tokens
        .by_symbol(token)
        .map(|descriptor| descriptor.address.clone())
        .ok_or_else(|| SwapError::UnknownAsset(token.to_string()))
}

fn ensure_stage(contract: &SwapContract, expected: LifecycleStage) -> SwapResult<()> {
    if contract.lifecycle_stage == expected {
        Ok(())
    } else {
        Err(SwapError::ContractNotActive {
            stage: contract.lifecycle_stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::StubProvider;
    use crate::chain::{CallPayload, ChainTransaction, Resolution, TxOutput, UnspentOutput};
    use crate::codec::address::AddressKind;
    use crate::codec::script::p2pkh_script;
    use crate::codec::{Base58Codec, SwapCall};
    use crate::config::{Base58Prefixes, ChainParams};
    use crate::contract::account::AccountContractBuilder;
    use crate::contract::utxo::UtxoContractBuilder;
    use crate::contract::fixtures::*;
    use crate::contract::TokenRegistry;
    use crate::tx::{FeeEstimate, FeeParams, Scale, UnsignedUtxoTransaction};
    use ethers::types::{Address, U256};
    use std::str::FromStr;
    use tokio_test::{assert_err, assert_ok};

    const PREFIXES: Base58Prefixes = Base58Prefixes {
        pubkey_addr: 0,
        script_addr: 5,
    };
    const BTC_TX: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

    fn btc_params() -> ChainParams {
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

    fn eth_params() -> ChainParams {
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

    fn btc_address(byte: u8) -> String {
        Base58Codec::new(PREFIXES).encode(AddressKind::PubkeyHash, &[byte; 20])
    }

    fn btc_provider() -> StubProvider {
        let unspent = |tx: &str, value: &str| UnspentOutput {
            transaction_id: tx.repeat(32),
            output_index: 0,
            value: Decimal::from_str(value).unwrap(),
            locking_script: hex::encode(p2pkh_script(&[0x11; 20]).as_bytes()),
        };
        StubProvider::utxo("BTC")
            .with_fee(FeeEstimate::PerTransaction(Decimal::new(1, 4)))
            .with_unspent(vec![unspent("01", "0.3"), unspent("02", "0.4")])
    }

    fn eth_provider() -> StubProvider {
        StubProvider::account("ETH")
            .with_fee(FeeEstimate::GasPrice(U256::from(20_000_000_000u64)))
            .with_nonce(4)
    }

    fn controller(btc: StubProvider, eth: StubProvider) -> SwapController {
        controller_with_tokens(btc, eth, TokenRegistry::default())
    }

    fn controller_with_tokens(
        btc: StubProvider,
        eth: StubProvider,
        eth_tokens: TokenRegistry,
    ) -> SwapController {
        let chains = ChainRegistry::new();
        chains.insert(ChainHandle {
            params: btc_params(),
            provider: Arc::new(btc),
            tokens: Arc::new(TokenRegistry::default()),
        });
        chains.insert(ChainHandle {
            params: eth_params(),
            provider: Arc::new(eth),
            tokens: Arc::new(eth_tokens),
        });
        SwapController::new(Arc::new(chains), SwapConfig::default())
    }

    fn btc_leg(value: &str) -> LegRequest {
        LegRequest {
            symbol: "BTC".to_string(),
            sender: btc_address(0x11),
            recipient: btc_address(0x22),
            value: Decimal::from_str(value).unwrap(),
            token_address: None,
        }
    }

    fn eth_leg() -> LegRequest {
        LegRequest {
            symbol: "eth".to_string(),
            sender: REFUND.to_string(),
            recipient: RECIPIENT.to_string(),
            value: Decimal::ONE,
            token_address: None,
        }
    }

    /// How a backend reports a broadcast UTXO transaction
    fn observed(tx: &UnsignedUtxoTransaction) -> ChainTransaction {
        ChainTransaction {
            id: BTC_TX.to_string(),
            inputs: vec![],
            outputs: tx
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

    /// Ether initiate locked until `expiry`, as a backend reports it
    fn eth_initiate(secret_hash: &SecretHash, expiry: DateTime<Utc>) -> ChainTransaction {
        let params = eth_params();
        let tokens = TokenRegistry::default();
        let fee = FeeParams {
            nonce: U256::zero(),
            gas_price: U256::one(),
            gas_limit: U256::from(200_000),
        };
        let (tx, _) = AccountContractBuilder::new(&params, &tokens)
            .initiate(REFUND, RECIPIENT, Decimal::ONE, secret_hash, expiry, None, &fee)
            .unwrap();
        ChainTransaction {
            id: INITIATE_TX.to_string(),
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

    #[tokio::test]
    async fn test_propose_then_participate_shares_secret_hash() {
        let before = Utc::now();
        let proposal = controller(btc_provider(), eth_provider())
            .propose(btc_leg("0.5"))
            .await
            .unwrap();

        let secret = proposal.secret.unwrap();
        assert_eq!(secret.hash(), proposal.secret_hash);
        assert!(proposal.lock_expiry >= before + Duration::hours(48));
        let script = proposal.contract_script.clone().unwrap();

        let funded = observed(proposal.transaction.as_utxo().unwrap());
        let controller = controller(btc_provider().with_transaction(funded), eth_provider());
        let participation = controller
            .participate("btc", &ContractReference::utxo(BTC_TX, script), eth_leg())
            .await
            .unwrap();

        assert_eq!(participation.secret_hash, proposal.secret_hash);
        assert_eq!(participation.secret, None);
        assert!(participation.lock_expiry < proposal.lock_expiry);
        assert_eq!(participation.contract_address, CONTRACT);
    }

    #[tokio::test]
    async fn test_propose_without_enough_coins() {
        let err = controller(btc_provider(), eth_provider())
            .propose(btc_leg("5"))
            .await
            .unwrap_err();
        match err {
            SwapError::InsufficientFunds { found, need } => {
                assert_eq!(found, "0.7");
                assert_eq!(need, "5.0001");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_participate_rejects_resolved_counterparty() {
        let hash: SecretHash = SECRET_HASH.parse().unwrap();
        let eth = eth_provider()
            .with_transaction(eth_initiate(&hash, Utc::now() + Duration::hours(24)))
            .with_resolution(Some(Resolution::Refunded));
        let controller = controller(btc_provider(), eth);

        let err = controller
            .participate("ETH", &ContractReference::account(INITIATE_TX), btc_leg("0.5"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SwapError::ContractNotActive {
                stage: LifecycleStage::Refunded
            }
        ));
    }

    #[tokio::test]
    async fn test_redeem_active_contract() {
        let secret = Secret::from([0x42; 32]);
        let eth = eth_provider()
            .with_transaction(eth_initiate(&secret.hash(), Utc::now() + Duration::hours(24)));
        let controller = controller(btc_provider(), eth);
        let reference = ContractReference::account(INITIATE_TX);

        let tx = controller.redeem("ETH", &reference, &secret).await.unwrap();
        let tx = tx.as_account().unwrap();
        assert_eq!(tx.nonce(), Some(&U256::from(4)));

        let err = controller
            .redeem("ETH", &reference, &Secret::from([0x43; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::SecretMismatch { .. }));
    }

    #[tokio::test]
    async fn test_refund_follows_expiry() {
        let hash: SecretHash = SECRET_HASH.parse().unwrap();
        let reference = ContractReference::account(INITIATE_TX);

        let expired = eth_provider().with_transaction(eth_initiate(&hash, expiry()));
        let tx = assert_ok!(controller(btc_provider(), expired).refund("ETH", &reference).await);
        assert!(tx.as_account().is_some());

        let active = eth_provider()
            .with_transaction(eth_initiate(&hash, Utc::now() + Duration::hours(1)));
        let err = assert_err!(controller(btc_provider(), active).refund("ETH", &reference).await);
        assert!(matches!(err, SwapError::ContractNotExpired { .. }));
    }

    /// BTC contract whose lock expired ten minutes ago by the wall clock
    fn lapsed_btc_contract() -> (ChainTransaction, ContractReference) {
        let params = btc_params();
        let unspent = UnspentOutput {
            transaction_id: "01".repeat(32),
            output_index: 0,
            value: Decimal::new(3, 1),
            locking_script: hex::encode(p2pkh_script(&[0x11; 20]).as_bytes()),
        };
        let built = UtxoContractBuilder::new(&params)
            .unwrap()
            .initiate(
                &btc_address(0x11),
                &btc_address(0x22),
                Decimal::new(2, 1),
                &SECRET_HASH.parse().unwrap(),
                Utc::now() - Duration::minutes(10),
                &[unspent],
                Decimal::new(1, 4),
            )
            .unwrap();
        let reference = ContractReference::utxo(BTC_TX, hex::encode(built.contract_script.as_bytes()));
        (observed(&built.transaction), reference)
    }

    #[tokio::test]
    async fn test_utxo_refund_waits_for_chain_time() {
        let (funded, reference) = lapsed_btc_contract();

        let lagging = btc_provider()
            .with_transaction(funded.clone())
            .with_chain_time(Utc::now() - Duration::minutes(70));
        let err = assert_err!(controller(lagging, eth_provider()).refund("BTC", &reference).await);
        assert!(matches!(err, SwapError::ContractNotExpired { .. }));

        let caught_up = btc_provider()
            .with_transaction(funded.clone())
            .with_chain_time(Utc::now() - Duration::minutes(5));
        let tx = assert_ok!(controller(caught_up, eth_provider()).refund("BTC", &reference).await);
        let tx = tx.as_utxo().unwrap();
        assert!(tx.transaction.lock_time.is_block_time());

        let unknown = btc_provider().with_transaction(funded);
        let err = assert_err!(controller(unknown, eth_provider()).refund("BTC", &reference).await);
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn test_secret_from_redeem_transaction() {
        let redeem = ChainTransaction {
            id: "0x02".to_string(),
            inputs: vec![],
            outputs: vec![],
            block_hash: None,
            block_height: None,
            call: Some(CallPayload {
                from: Address::from_str(RECIPIENT).unwrap(),
                to: Some(Address::from_str(CONTRACT).unwrap()),
                value: U256::zero(),
                input: SwapCall::Redeem { secret: [0x42; 32] }.encode(),
            }),
        };
        let hash: SecretHash = SECRET_HASH.parse().unwrap();
        let eth = eth_provider()
            .with_transaction(redeem)
            .with_transaction(eth_initiate(&hash, expiry()));
        let controller = controller(btc_provider(), eth);

        let secret = assert_ok!(controller.secret_from_redeem("ETH", "0x02").await);
        assert_eq!(secret, Secret::from([0x42; 32]));

        let err = assert_err!(controller.secret_from_redeem("ETH", INITIATE_TX).await);
        assert!(matches!(err, SwapError::NotAContractTransaction(_)));
        let err = assert_err!(controller.secret_from_redeem("ETH", "0x03").await);
        assert!(matches!(err, SwapError::TransactionNotFound { .. }));
    }

    #[tokio::test]
    async fn test_token_given_by_symbol() {
        let controller = controller_with_tokens(
            btc_provider(),
            eth_provider(),
            TokenRegistry::new(vec![bbt()]),
        );

        let tx = assert_ok!(controller.approve_token("ETH", REFUND, Decimal::ONE, "bbt").await);
        let tx = tx.as_account().unwrap();
        assert_eq!(
            tx.to().and_then(|to| to.as_address().copied()),
            Some(Address::from_str(BBT).unwrap())
        );

        let err = assert_err!(controller.approve_token("ETH", REFUND, Decimal::ONE, "XYZ").await);
        assert!(matches!(err, SwapError::UnknownAsset(_)));

        let mut leg = eth_leg();
        leg.token_address = Some("BBT".to_string());
        let proposal = assert_ok!(controller.propose(leg).await);
        assert!(proposal.contract_address.eq_ignore_ascii_case(TOKEN_CONTRACT));
    }

    #[tokio::test]
    async fn test_extract_secret() {
        let secret = Secret::from([0x42; 32]);
        let initiate = eth_initiate(&secret.hash(), expiry());
        let reference = ContractReference::account(INITIATE_TX);

        let redeemed = eth_provider()
            .with_transaction(initiate.clone())
            .with_resolution(Some(Resolution::Redeemed(secret)));
        let found = controller(btc_provider(), redeemed)
            .extract_secret("ETH", &reference)
            .await
            .unwrap();
        assert_eq!(found, Some(secret));

        let pending = eth_provider().with_transaction(initiate);
        let found = controller(btc_provider(), pending)
            .extract_secret("ETH", &reference)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn test_unknown_chain() {
        let err = controller(btc_provider(), eth_provider())
            .audit("LTC", &ContractReference::account(INITIATE_TX))
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::ChainNotFound { .. }));
    }

    #[tokio::test]
    async fn test_approve_is_account_only() {
        let controller = controller(btc_provider(), eth_provider());
        let err = controller
            .approve_token("BTC", &btc_address(0x11), Decimal::ONE, BBT)
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::UnsupportedOperation { .. }));
    }
}
