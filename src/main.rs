//! Mini-Multisig demo
//!
//! Funds a 1-of-2 P2SH multisig address from a single-key address and spends
//! it back, against an in-memory ledger.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use mini_multisig::chain::MemoryChain;
use mini_multisig::core::{Address, Network};
use mini_multisig::crypto::{KeyPair, PublicKey};
use mini_multisig::workflow::{FundSpendWorkflow, WorkflowConfig};
use tokio_util::sync::CancellationToken;

const DEFAULT_SOURCE_KEY: &str = "8c026a359a13f707a3497ef58da45b628958ff98b5f33322cf29ede12fcfd56f";
const DEFAULT_SIGNER_KEYS: [&str; 2] = [
    "612b3ca3f368cf2658c2e1777d2fa28e6bcde8ea19312cbf69e09e7333e13994",
    "d65788b9947b41625ffff946bc145187c6b85d1686e60becdf34567f17478730",
];

#[derive(Parser)]
#[command(name = "multisig-demo")]
#[command(version = "0.1.0")]
#[command(about = "Fund and spend a P2SH multisig output", long_about = None)]
struct Cli {
    /// JSON workflow configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network (overrides the config file)
    #[arg(short, long)]
    network: Option<Network>,

    /// Amount to lock into the multisig output (overrides the config file)
    #[arg(short, long)]
    amount: Option<u64>,

    /// Signatures required to spend (overrides the config file)
    #[arg(short, long)]
    threshold: Option<usize>,

    /// Funding key, hex
    #[arg(long, default_value = DEFAULT_SOURCE_KEY)]
    source_key: String,

    /// Multisig signer keys, hex (repeat for each signer)
    #[arg(long = "signer-key")]
    signer_keys: Vec<String>,

    /// Indexes into the signer keys that sign the spend
    #[arg(long = "spend-with", default_values_t = vec![1usize])]
    spend_with: Vec<usize>,

    /// Where the multisig output is spent to (default: back to the source)
    #[arg(short, long)]
    destination: Option<Address>,

    /// Value of the output seeded at the source address
    #[arg(long, default_value = "100000")]
    seed_value: u64,

    /// Print the full report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => WorkflowConfig::from_json_file(path)?,
        None => WorkflowConfig::default(),
    };
    if let Some(network) = cli.network {
        config.network = network;
    }
    if let Some(amount) = cli.amount {
        config.fund_amount = amount;
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    config.validate()?;

    let source = KeyPair::from_private_key_hex(&cli.source_key, config.network)?;
    let signer_hex: Vec<String> = if cli.signer_keys.is_empty() {
        DEFAULT_SIGNER_KEYS.iter().map(|k| k.to_string()).collect()
    } else {
        cli.signer_keys.clone()
    };
    let signers = signer_hex
        .iter()
        .map(|hex| KeyPair::from_private_key_hex(hex, config.network))
        .collect::<Result<Vec<_>, _>>()?;
    let spend_signers = cli
        .spend_with
        .iter()
        .map(|&i| {
            signers
                .get(i)
                .cloned()
                .ok_or_else(|| format!("no signer key at index {}", i))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let pubkeys: Vec<PublicKey> = signers.iter().map(|k| *k.public_key()).collect();
    let wallet = config.multisig_wallet(pubkeys)?;
    let destination = cli.destination.unwrap_or_else(|| source.address());

    println!("Source address:   {}", source.address());
    println!("Multisig address: {} ({})", wallet.address(), wallet.description());
    println!("Redeem script:    {}", wallet.redeem_script().to_asm());

    let chain = Arc::new(MemoryChain::new());
    chain.seed_address(&source.address(), cli.seed_value).await;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    let mut workflow = FundSpendWorkflow::new(chain.clone(), source, wallet, destination, config)
        .with_spend_signers(spend_signers);
    let report = workflow.run(&cancel).await?;

    if let Some(txid) = report.funding_txid {
        println!("Funded to:        {}", txid);
    }
    if let Some(txid) = report.spending_txid {
        println!("Funded back to:   {}", txid);
    }
    println!(
        "Destination balance: {}",
        chain.balance(&destination).await
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
