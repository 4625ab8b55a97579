//! Stock ledger server binary
//!
//! Usage: `stock-ledger-server [config.toml]`. Without a path the configuration
//! comes from `STOCK_LEDGER_*` environment variables. Set
//! `STOCK_LEDGER_LOG_FORMAT=json` for JSON log lines.

use anyhow::Context;
use stock_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("STOCK_LEDGER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting stock ledger server");

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => Config::from_env().context("Failed to load config from environment")?,
    };

    let ledger = Ledger::open(config).await.context("Failed to open ledger")?;
    tracing::info!(
        data_dir = %ledger.config().data_dir.display(),
        orders = ledger.order_count()?,
        "Ledger opened successfully"
    );

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down stock ledger server");
    ledger.shutdown().await?;
    Ok(())
}
