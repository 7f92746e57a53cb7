//! Configuration module for the session string bot.
//!
//! Handles loading of the bot's Telegram credentials and the tunables
//! for storage, rate limiting and cleanup.

mod settings;

pub use settings::{BotSettings, ConfigError, TelegramConfig};
