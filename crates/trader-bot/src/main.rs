//! Trader runtime entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// On-prem automated paper-trading runtime.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also via AUTOTRADER_CONFIG).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    trader_telemetry::init_logging()?;

    info!("starting autotrader v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .or_else(|| std::env::var("AUTOTRADER_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    info!(config_path = %config_path, "loading configuration");

    let config = trader_bot::AppConfig::from_file(&config_path)?;
    let mut app = trader_bot::Application::new(config)?;
    app.run().await?;

    Ok(())
}
