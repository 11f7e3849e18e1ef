use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use stock_bot::bot::{self, BotError};
use stock_bot::config::{Config, ConfigError};
use stock_bot::metrics::Metrics;
use stock_bot::{liveness, service};

/// Stock Bot - hands out single-use items over Discord slash commands
#[derive(Parser, Debug)]
#[command(name = "stock-bot", version, about)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "STOCK_BOT_CONFIG")]
    config: Option<PathBuf>,

    /// Discord bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Liveness endpoint port
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Guild to register commands in (overrides the config file)
    #[arg(short, long, env = "GUILD_ID")]
    guild_id: Option<u64>,
}

async fn run(args: Args) -> Result<(), BotError> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(guild_id) = args.guild_id {
        config.guild_id = guild_id;
    }

    // No token, no networking.
    let token = args
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or(ConfigError::MissingToken)?;
    config.validate()?;

    service::init_storage(&config.storage)?;

    let config = Arc::new(config);
    let metrics = Arc::new(Metrics::new());

    liveness::spawn(args.port, metrics.clone()).await?;
    bot::run(token.trim(), config, metrics).await
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stock_bot=info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    info!(port = args.port, "📦 Stock Bot starting");

    match run(args).await {
        Ok(()) => info!("Discord connection closed"),
        Err(BotError::InvalidToken) => {
            error!("❌ the bot token is invalid");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "❌ failed to run the bot");
            std::process::exit(1);
        }
    }
}
