/// Shoutrelay - main entry point
use shoutrelay_core::{Config, Relay};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let config = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    info!("Starting shoutrelay");
    info!("   IRC: {}:{} {}", config.irc.server, config.irc.port, config.irc.relay_channel);
    info!("   Shoutbox: {}", config.shout.url);

    // Runs until Ctrl+C / SIGTERM
    Relay::new(config).run().await
        .map_err(|e| anyhow::anyhow!("Relay error: {}", e))?;

    Ok(())
}
