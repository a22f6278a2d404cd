//! Wallet ledger service binary
//!
//! Usage: `wallet-ledger [config.toml]`. Without a file, configuration comes
//! from `WALLET_*` environment variables.

use anyhow::Context;
use wallet_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting wallet ledger");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        None => Config::from_env().context("failed to load config from environment")?,
    };

    // Open ledger
    let ledger = Ledger::open(&config).context("failed to open ledger")?;
    let stats = ledger.stats().await?;
    tracing::info!(
        data_dir = ?config.data_dir,
        wallets = stats.wallets,
        entries = stats.entries,
        "Ledger ready"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down wallet ledger");
    Ok(())
}
