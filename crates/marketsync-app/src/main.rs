//! marketsync - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Keeps local order book, trade and candle caches in sync with an exchange.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via MARKETSYNC_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS connection is made.
    marketsync_ws::init_crypto();

    let args = Args::parse();

    marketsync_telemetry::init_logging()?;

    info!("Starting marketsync v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > MARKETSYNC_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("MARKETSYNC_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = marketsync_app::AppConfig::load(&config_path)?;
    info!(symbols = ?config.symbols, rest_url = %config.rest.base_url, "Configuration loaded");

    let app = marketsync_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
