//! txflow - send and track EVM transactions from the command line

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ethers::types::{Bytes, U256};
use evm_txflow::{metrics, units, Erc20, GasHints, Settings, TxClient, TxIntent};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to TXFLOW_CONFIG or config/default.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print Prometheus metrics before exiting
    #[arg(long)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show chain id, account and balance
    Info,
    /// Send a transaction and wait for its receipt
    Send {
        /// Recipient. Omit to deploy `--data` as init code.
        #[arg(long)]
        to: Option<String>,
        /// Amount, e.g. `0.1ether`, `30gwei` or plain wei
        #[arg(long, default_value = "0", value_parser = parse_value)]
        value: U256,
        /// Hex call data or init code
        #[arg(long, value_parser = parse_hex)]
        data: Option<Bytes>,
        /// Gas limit, 0 to estimate
        #[arg(long, default_value_t = 0)]
        gas_limit: u64,
        #[arg(long)]
        nonce: Option<u64>,
    },
    /// Execute a read-only call and print the raw result
    Call {
        #[arg(long)]
        to: String,
        #[arg(long, value_parser = parse_hex)]
        data: Bytes,
    },
    /// Show ERC-20 token metadata and a holder's balance
    Token {
        address: String,
        /// Holder to query, defaults to the session account
        #[arg(long)]
        owner: Option<String>,
    },
}

fn parse_value(s: &str) -> std::result::Result<U256, String> {
    units::parse_amount(s).map_err(|e| e.to_string())
}

fn parse_hex(s: &str) -> std::result::Result<Bytes, String> {
    hex::decode(s.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| format!("invalid hex {}: {}", s, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let settings = match args.config {
        Some(ref path) => Settings::from_path(path)?,
        None => Settings::load()?,
    };

    let client = TxClient::from_settings(&settings)
        .await
        .context("Failed to open session")?;

    match args.command {
        Command::Info => {
            let balance = client.balance().await?;
            println!("chain id: {}", client.chain_id());
            println!("account:  {:?}", client.address());
            println!("balance:  {} ETH", units::format_ether(balance));
        }
        Command::Send {
            to,
            value,
            data,
            gas_limit,
            nonce,
        } => {
            let data = data.unwrap_or_default();
            let intent = match to {
                Some(ref to) => TxIntent::call(to, data, value)?,
                None => TxIntent::deploy(data, value),
            };
            let mut hints = GasHints::default().with_gas_limit(gas_limit);
            if let Some(nonce) = nonce {
                hints = hints.with_nonce(nonce);
            }

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                trigger.cancel();
            });

            match client.send_with_cancel(&intent, &hints, &cancel).await {
                Ok(receipt) => {
                    let fee = receipt
                        .fee_paid()
                        .map(|fee| format!("{} ETH", units::format_ether(fee)))
                        .unwrap_or_else(|| "unknown".to_string());
                    println!(
                        "confirmed {:?} in block {} (gas used {}, fee {})",
                        receipt.hash, receipt.block_number, receipt.gas_used, fee
                    );
                }
                Err(e) if e.is_outcome_unknown() => {
                    warn!("{}", e);
                    println!("outcome unknown, the transaction may still be mined: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Call { to, data } => {
            let intent = TxIntent::call(&to, data, U256::zero())?;
            let output = client.call(&intent).await?;
            println!("0x{}", hex::encode(output));
        }
        Command::Token { address, owner } => {
            let token = Erc20::new(&client, &address)?;
            let owner = owner.unwrap_or_else(|| format!("{:?}", client.address()));
            let decimals = token.decimals().await?;
            let balance = token.balance_of(&owner).await?;
            println!("token:    {} ({})", token.name().await?, token.symbol().await?);
            println!("decimals: {}", decimals);
            println!(
                "balance:  {}",
                units::format_decimals(balance, u32::from(decimals))?
            );
        }
    }

    if args.metrics {
        print!("{}", metrics::render());
    }

    info!("Done");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evm_txflow=debug"));

    let json = std::env::var("TXFLOW_LOG_JSON").map_or(false, |v| v == "1" || v == "true");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
