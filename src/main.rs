//! Tesseract HTLC - command line front end for cross-chain atomic swaps
//!
//! Every command prints JSON on stdout; logs go to stderr.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use tesseract_htlc::chain::ChainRegistry;
use tesseract_htlc::contract::{ContractReference, Secret};
use tesseract_htlc::{LegRequest, Settings, SwapController};

#[derive(Parser)]
#[command(name = "tesseract-htlc", version, about = "Hash-time-locked atomic swaps")]
struct Cli {
    /// Configuration file, defaults to $SWAP_CONFIG or config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Latest block of every enabled chain
    Status,
    LatestBlock {
        #[arg(long)]
        chain: String,
    },
    Balance {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        address: String,
    },
    /// Unspent outputs covering an amount
    Utxos {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        address: String,
        #[arg(long)]
        amount: Decimal,
    },
    BlockHash {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        height: u64,
    },
    /// Decode a contract and resolve its stage
    Audit(ContractArgs),
    ExtractSecret(ContractArgs),
    /// Secret revealed by a known redeem transaction
    RedeemSecret {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        tx: String,
    },
    /// Lock the initiator's leg behind a fresh secret
    Propose(LegArgs),
    /// Lock the counter-leg against an audited contract
    Participate {
        #[arg(long)]
        counterparty_chain: String,
        #[arg(long)]
        counterparty_tx: String,
        /// Hex HTLC script of a UTXO counterparty contract
        #[arg(long)]
        counterparty_script: Option<String>,
        #[command(flatten)]
        leg: LegArgs,
    },
    Redeem {
        #[command(flatten)]
        contract: ContractArgs,
        #[arg(long)]
        secret: Secret,
    },
    Refund(ContractArgs),
    /// Let the token swap contract pull tokens from the sender
    ApproveToken {
        #[arg(long)]
        chain: String,
        #[arg(long)]
        sender: String,
        #[arg(long)]
        amount: Decimal,
        /// Token contract address or registered symbol
        #[arg(long)]
        token: String,
    },
}

#[derive(Args)]
struct ContractArgs {
    #[arg(long)]
    chain: String,
    /// Initiate transaction id
    #[arg(long)]
    tx: String,
    /// Hex HTLC script, required on UTXO chains
    #[arg(long)]
    script: Option<String>,
}

impl ContractArgs {
    fn reference(&self) -> ContractReference {
        ContractReference {
            tx_id: self.tx.clone(),
            contract_script: self.script.clone(),
        }
    }
}

#[derive(Args)]
struct LegArgs {
    #[arg(long)]
    chain: String,
    #[arg(long)]
    sender: String,
    #[arg(long)]
    recipient: String,
    #[arg(long)]
    amount: Decimal,
    /// Lock a registered token, by address or symbol, instead of the native coin
    #[arg(long)]
    token: Option<String>,
}

impl From<LegArgs> for LegRequest {
    fn from(args: LegArgs) -> Self {
        LegRequest {
            symbol: args.chain,
            sender: args.sender,
            recipient: args.recipient,
            value: args.amount,
            token_address: args.token,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration for {} chains",
        settings.enabled_chains().len()
    );

    let chains = Arc::new(ChainRegistry::from_settings(&settings)?);
    let controller = SwapController::new(chains.clone(), settings.swap.clone());

    match cli.command {
        Command::Status => {
            let status: Vec<_> = chains
                .health_check()
                .await
                .into_iter()
                .map(|(symbol, latest_block)| json!({ "chain": symbol, "latest_block": latest_block }))
                .collect();
            print_json(&status)?;
        }
        Command::LatestBlock { chain } => {
            let handle = chains.get(&chain)?;
            print_json(&json!({ "latest_block": handle.provider.latest_block().await }))?;
        }
        Command::Balance { chain, address } => {
            let handle = chains.get(&chain)?;
            let balance = handle.provider.get_balance(&address).await?;
            print_json(&json!({ "address": address, "balance": balance }))?;
        }
        Command::Utxos {
            chain,
            address,
            amount,
        } => {
            let handle = chains.get(&chain)?;
            let unspent = handle.provider.get_unspent_outputs(&address, amount).await?;
            print_json(&unspent)?;
        }
        Command::BlockHash { chain, height } => {
            let handle = chains.get(&chain)?;
            print_json(&json!({ "height": height, "hash": handle.provider.block_hash(height).await }))?;
        }
        Command::Audit(args) => {
            let resolved = controller.audit(&args.chain, &args.reference()).await?;
            let url = chains.get(&args.chain)?.provider.transaction_url(&args.tx);
            print_json(&json!({
                "stage": resolved.contract.lifecycle_stage,
                "details": resolved.contract.show_details(),
                "secret": resolved.secret,
                "transaction_url": url,
            }))?;
        }
        Command::ExtractSecret(args) => {
            let secret = controller.extract_secret(&args.chain, &args.reference()).await?;
            print_json(&json!({ "secret": secret }))?;
        }
        Command::RedeemSecret { chain, tx } => {
            let secret = controller.secret_from_redeem(&chain, &tx).await?;
            print_json(&json!({ "secret": secret }))?;
        }
        Command::Propose(leg) => {
            let proposal = controller.propose(leg.into()).await?;
            print_json(&proposal)?;
        }
        Command::Participate {
            counterparty_chain,
            counterparty_tx,
            counterparty_script,
            leg,
        } => {
            let counterparty = ContractReference {
                tx_id: counterparty_tx,
                contract_script: counterparty_script,
            };
            let participation = controller
                .participate(&counterparty_chain, &counterparty, leg.into())
                .await?;
            print_json(&participation)?;
        }
        Command::Redeem { contract, secret } => {
            let tx = controller
                .redeem(&contract.chain, &contract.reference(), &secret)
                .await?;
            print_json(&tx)?;
        }
        Command::Refund(args) => {
            let tx = controller.refund(&args.chain, &args.reference()).await?;
            print_json(&tx)?;
        }
        Command::ApproveToken {
            chain,
            sender,
            amount,
            token,
        } => {
            let tx = controller
                .approve_token(&chain, &sender, amount, &token)
                .await?;
            print_json(&tx)?;
        }
    }

    Ok(())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,tesseract_htlc=debug,reqwest=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .init();
}
