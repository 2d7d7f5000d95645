use anyhow::Context;
use scrabble_bot::config::BotConfig;
use scrabble_bot::{app, logging, panic_hook};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config_path = BotConfig::resolve_path(std::env::args().nth(1));
    let config = BotConfig::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let (logging, _guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    let report = app::run(config, logging).await.map_err(|e| {
        tracing::error!("scrabble-bot stopped: {}", e);
        e
    })?;

    tracing::info!(?report, "scrabble-bot exited");
    Ok(())
}
