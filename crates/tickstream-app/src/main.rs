//! tickstream - Market-data stream client entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Market-data stream client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    tickstream_ws::init_crypto();

    let args = Args::parse();

    tickstream_telemetry::init_logging()?;

    info!("Starting tickstream v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > TICKSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = tickstream_app::AppConfig::from_file(&config_path)?;
    info!(
        feeds = config.feeds.len(),
        default_feed = %config.default_feed,
        open_mode = ?config.websocket.open_mode,
        "Configuration loaded"
    );

    let app = tickstream_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
