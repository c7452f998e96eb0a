use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dealfinder_config::AppConfig;
use dealfinder_runtime::liveness::{self, LivenessState};
use dealfinder_runtime::{Button, ChatId, Dispatcher, UserId};
use dealfinder_search::Category;

#[derive(Debug, Parser)]
#[command(
    name = "dealfinder",
    version,
    about = "Telegram bot that finds marketplace deals and links them with an affiliate tag"
)]
struct Cli {
    /// Configuration file; missing files fall back to defaults.
    #[arg(long, global = true, default_value = "config/default.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the Telegram bot and the liveness endpoint (default).
    Run,
    /// Run one search from the terminal and print the replies.
    Search {
        #[arg(required = true)]
        query: Vec<String>,
        /// fashion, electronics, books, home or all.
        #[arg(long, default_value = "all")]
        category: Category,
    },
    /// Print the effective configuration with secrets redacted.
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_bot(config).await?,
        Commands::Search { query, category } => {
            run_search(&config, &query.join(" "), category).await?
        }
        Commands::Config => print!("{}", toml::to_string_pretty(&config.redacted())?),
    }

    Ok(())
}

async fn run_bot(config: AppConfig) -> Result<()> {
    config.validate_for_bot()?;

    let dispatcher = Arc::new(Dispatcher::from_config(&config)?);

    if config.liveness.enabled {
        let liveness_config = config.liveness.clone();
        let state = LivenessState::new(&config.bot.name);
        tokio::spawn(async move {
            if let Err(err) = liveness::serve(&liveness_config, state).await {
                error!(%err, "liveness endpoint stopped");
            }
        });
    }

    info!(
        bot = %config.bot.name,
        marketplace = %config.marketplace.base_url,
        "starting bot"
    );
    dealfinder_telegram::start_bot(&config.telegram, dispatcher).await
}

async fn run_search(config: &AppConfig, text: &str, category: Category) -> Result<()> {
    let dispatcher = Dispatcher::from_config(config)?;
    let user = UserId(0);
    dispatcher.sessions().set_category(user, category);

    for message in dispatcher.search(ChatId(0), user, text).await {
        println!("{}", message.text);
        for button in message.buttons.iter().flatten() {
            match button {
                Button::Url { label, url } => println!("  [{label}] {url}"),
                Button::Callback { label, data } => println!("  [{label}] ({data})"),
            }
        }
        println!();
    }
    Ok(())
}
