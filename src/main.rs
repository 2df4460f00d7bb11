//! AA wallet maintenance CLI
//!
//! Inspects and maintains the persisted wallet state (nonce store,
//! transaction database) from outside the hosting application.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use arbius_wallet::clock::SystemClock;
use arbius_wallet::config::AAWalletConfig;
use arbius_wallet::nonce::NonceStore;
use arbius_wallet::storage::{FileKvStore, SafeStorage, TransactionStorage};

/// Arbius AA wallet maintenance tool
#[derive(Parser)]
#[command(name = "aawallet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the wallet's persisted state
    #[arg(short, long, default_value = ".", env = "ARBIUS_DATA_DIR")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a wallet configuration file
    Validate {
        /// Path to config file
        #[arg(default_value = "config.toml")]
        config: String,
    },

    /// Nonce store maintenance
    Nonce {
        #[command(subcommand)]
        command: NonceCommands,
    },

    /// Show transaction history for an address
    History {
        /// Wallet address
        address: String,

        /// Maximum number of transactions to show
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Show pending transactions for an address
    Pending {
        /// Wallet address
        address: String,
    },

    /// Count stored transactions for an address
    Count {
        /// Wallet address
        address: String,
    },
}

#[derive(Subcommand)]
enum NonceCommands {
    /// Count stored and expired nonces
    Stats,
    /// Remove expired and corrupt nonces
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("arbius_wallet=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let config = AAWalletConfig::load(&config)?;
            info!("configuration is valid");
            println!(
                "ok: default chain {} / {} supported chain(s)",
                config.default_chain_id,
                config.supported_chain_ids.len()
            );
        }

        Commands::Nonce { command } => {
            let storage = open_kv(&cli.data_dir);
            let nonces = NonceStore::new(storage, Arc::new(SystemClock));
            match command {
                NonceCommands::Stats => {
                    let stats = nonces.get_nonce_stats();
                    println!("total: {}", stats.total);
                    println!("expired: {}", stats.expired);
                }
                NonceCommands::Cleanup => {
                    let cleaned = nonces.cleanup_expired_nonces();
                    println!("removed {} nonce(s)", cleaned);
                }
            }
        }

        Commands::History { address, limit } => {
            let storage = open_tx_store(&cli.data_dir).await;
            let history = storage.load_transaction_history(&address, limit).await;
            if history.is_empty() {
                println!("no transactions for {}", address);
            }
            for tx in history {
                println!(
                    "{}  {:?}  {}  {}",
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    tx.status,
                    tx.method,
                    tx.hash.as_deref().unwrap_or("-"),
                );
            }
        }

        Commands::Pending { address } => {
            let storage = open_tx_store(&cli.data_dir).await;
            let pending = storage.load_pending_transactions(&address).await;
            println!("{} pending transaction(s)", pending.len());
            for tx in pending {
                println!("{}  {}  chain {}", tx.id, tx.method, tx.chain_id);
            }
        }

        Commands::Count { address } => {
            let storage = open_tx_store(&cli.data_dir).await;
            println!("{}", storage.get_transaction_count(&address).await);
        }
    }

    Ok(())
}

fn open_kv(data_dir: &str) -> SafeStorage {
    let path = std::path::Path::new(data_dir).join("keyvalue.json");
    SafeStorage::new(Arc::new(FileKvStore::open(path)))
}

async fn open_tx_store(data_dir: &str) -> TransactionStorage {
    TransactionStorage::open(data_dir, Arc::new(SystemClock)).await
}
