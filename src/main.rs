//! Session String Bot - Main Entry Point
//!
//! A Telegram bot that walks users through an account login and hands them
//! a portable session string.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use session_string_bot::account::GrammersConnector;
use session_string_bot::commands::CommandHandler;
use session_string_bot::config::{BotSettings, TelegramConfig};
use session_string_bot::conversation::ConversationService;
use session_string_bot::dispatch::Dispatcher;
use session_string_bot::scheduler::{CleanupScheduler, SchedulerMessage};
use session_string_bot::storage::{CredentialStore, UsageLog};
use session_string_bot::telegram::BotClient;
use session_string_bot::updater::SelfUpdater;

/// Telegram bot that generates string sessions.
#[derive(Parser, Debug)]
#[command(name = "session_string_bot")]
#[command(about = "Generate Telegram string sessions through a guided login")]
#[command(version)]
struct Args {
    /// Path to the .env file for environment variables.
    #[arg(long, default_value = ".env")]
    env_file: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Disable the /updatebot command.
    #[arg(long)]
    no_self_update: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level);

    // Load environment variables
    if let Err(e) = dotenvy::from_filename(&args.env_file) {
        debug!("Could not load .env file ({}): {}", args.env_file, e);
    }

    // Load configurations
    let tg_config = TelegramConfig::from_env()
        .context("Failed to load Telegram configuration from environment")?;
    let settings = BotSettings::from_env_with_defaults();

    let store = CredentialStore::open(&settings.sessions_dir)
        .context("Failed to prepare the sessions directory")?;
    let usage = UsageLog::open(&settings.usage_db_path)
        .await
        .context("Failed to open the usage database")?;

    info!(
        "Storage ready (sessions: {}, usage db: {})",
        settings.sessions_dir.display(),
        settings.usage_db_path.display()
    );

    // Connect to Telegram
    let (bot, mut updates) = BotClient::connect(&tg_config)
        .await
        .context("Failed to connect to Telegram")?;

    let bot_username = match bot.inner().get_me().await {
        Ok(me) => me.username().map(str::to_owned),
        Err(e) => {
            warn!("Could not fetch bot profile: {}", e);
            None
        }
    };

    let conversations = Arc::new(
        ConversationService::new(
            GrammersConnector::new(),
            store.clone(),
            usage.clone(),
            settings.max_attempts,
        )
        .with_remote_timeout(settings.remote_timeout())
        .with_support_contact(settings.support_contact.clone()),
    );

    let mut handler = CommandHandler::new(
        Arc::clone(&conversations),
        store.clone(),
        usage.clone(),
        tg_config.owner_id,
    )
    .with_bot_username(bot_username);
    if !args.no_self_update {
        handler = handler.with_updater(SelfUpdater::new(&settings.repo_dir));
    }
    let mut dispatcher = Dispatcher::new(Arc::new(handler));

    // Create scheduler
    let (scheduler_tx, scheduler_rx) = mpsc::channel::<SchedulerMessage>(8);
    let scheduler = CleanupScheduler::new(
        store,
        settings.session_max_age(),
        Duration::from_secs(settings.cleanup_interval_secs),
    )
    .with_first_delay(Duration::from_secs(settings.cleanup_first_delay_secs))
    .with_idle_flows(Arc::clone(&conversations), settings.flow_idle_timeout());

    let scheduler_handle = tokio::spawn(async move {
        scheduler.run(scheduler_rx).await;
    });

    info!(
        "Bot is running (max attempts: {}, remote timeout: {}s). Use Ctrl+C to stop.",
        settings.max_attempts, settings.remote_timeout_secs
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
            next = updates.next_message() => {
                match next {
                    Ok((message, outbox)) => dispatcher.dispatch(message, Box::new(outbox)),
                    Err(e) => {
                        error!("Update stream stopped: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    conversations.shutdown().await;
    let _ = scheduler_tx.send(SchedulerMessage::Shutdown).await;
    let _ = scheduler_handle.await;
    usage.close().await;
    bot.disconnect();

    Ok(())
}

/// Initializes the logging subsystem.
fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
