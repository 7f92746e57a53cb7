//! Application settings and Telegram configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Telegram API configuration for the bot itself.
///
/// These values identify *this* bot to Telegram. The `api_id`/`api_hash`
/// pair a user types during `/genstring` is unrelated and never lands here.
#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (obtain from <https://my.telegram.org>).
    pub api_id: i32,

    /// Telegram API hash (obtain from <https://my.telegram.org>).
    pub api_hash: String,

    /// Token issued by `@BotFather`.
    pub bot_token: String,

    /// User allowed to run administrative commands.
    pub owner_id: i64,

    /// Path to the bot's own session file.
    #[serde(default = "default_bot_session_path")]
    pub session_path: PathBuf,
}

fn default_bot_session_path() -> PathBuf {
    PathBuf::from("bot.session")
}

impl TelegramConfig {
    /// Creates a new Telegram configuration.
    #[must_use]
    pub fn new(api_id: i32, api_hash: String, bot_token: String, owner_id: i64) -> Self {
        Self {
            api_id,
            api_hash,
            bot_token,
            owner_id,
            session_path: default_bot_session_path(),
        }
    }

    /// Creates configuration from environment variables.
    ///
    /// Expects `API_ID`, `API_HASH`, `BOT_TOKEN` and `OWNER_ID` to be set.
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_id: i32 = require("API_ID")?
            .trim()
            .parse()
            .ok()
            .filter(|id| *id > 0)
            .ok_or(ConfigError::InvalidApiId)?;

        let api_hash = require("API_HASH")?;
        let bot_token = require("BOT_TOKEN")?;

        let owner_id: i64 = require("OWNER_ID")?
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidOwnerId)?;

        let session_path = std::env::var("BOT_SESSION_PATH")
            .map_or_else(|_| default_bot_session_path(), PathBuf::from);

        Ok(Self {
            api_id,
            api_hash,
            bot_token,
            owner_id,
            session_path,
        })
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_id", &self.api_id)
            .field("owner_id", &self.owner_id)
            .field("session_path", &self.session_path)
            .finish_non_exhaustive()
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnvVar(name))
}

/// Bot-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSettings {
    /// Directory holding one credential artifact per user.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// SQLite database with usage events.
    #[serde(default = "default_usage_db_path")]
    pub usage_db_path: PathBuf,

    /// How many times a user may run `/genstring` per process lifetime.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Artifacts older than this are removed by the cleanup job.
    #[serde(default = "default_session_max_age_days")]
    pub session_max_age_days: u64,

    /// Interval between cleanup runs in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// Delay before the first cleanup run in seconds.
    #[serde(default = "default_cleanup_first_delay")]
    pub cleanup_first_delay_secs: u64,

    /// Upper bound for every call against the account API.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Unfinished flows waiting this long for input are dropped and their
    /// login connection closed.
    #[serde(default = "default_flow_idle_timeout")]
    pub flow_idle_timeout_secs: u64,

    /// Git checkout pulled by `/updatebot`.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: PathBuf,

    /// Appended to error messages shown to users.
    #[serde(default)]
    pub support_contact: Option<String>,
}

fn default_sessions_dir() -> PathBuf {
    PathBuf::from("sessions")
}

fn default_usage_db_path() -> PathBuf {
    PathBuf::from("analytics.db")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_session_max_age_days() -> u64 {
    30
}

fn default_cleanup_interval() -> u64 {
    86_400 // daily
}

fn default_cleanup_first_delay() -> u64 {
    10
}

fn default_remote_timeout() -> u64 {
    60
}

fn default_flow_idle_timeout() -> u64 {
    600
}

fn default_repo_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            usage_db_path: default_usage_db_path(),
            max_attempts: default_max_attempts(),
            session_max_age_days: default_session_max_age_days(),
            cleanup_interval_secs: default_cleanup_interval(),
            cleanup_first_delay_secs: default_cleanup_first_delay(),
            remote_timeout_secs: default_remote_timeout(),
            flow_idle_timeout_secs: default_flow_idle_timeout(),
            repo_dir: default_repo_dir(),
            support_contact: None,
        }
    }
}

impl BotSettings {
    /// Creates bot settings from environment variables with defaults.
    #[must_use]
    pub fn from_env_with_defaults() -> Self {
        Self {
            sessions_dir: std::env::var("SESSIONS_DIR")
                .map_or_else(|_| default_sessions_dir(), PathBuf::from),
            usage_db_path: std::env::var("USAGE_DB_PATH")
                .map_or_else(|_| default_usage_db_path(), PathBuf::from),
            max_attempts: parse_env("MAX_ATTEMPTS").unwrap_or_else(default_max_attempts),
            session_max_age_days: parse_env("SESSION_MAX_AGE_DAYS")
                .unwrap_or_else(default_session_max_age_days),
            cleanup_interval_secs: parse_env("CLEANUP_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or_else(default_cleanup_interval),
            cleanup_first_delay_secs: parse_env("CLEANUP_FIRST_DELAY_SECS")
                .unwrap_or_else(default_cleanup_first_delay),
            remote_timeout_secs: parse_env("REMOTE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or_else(default_remote_timeout),
            flow_idle_timeout_secs: parse_env("FLOW_IDLE_TIMEOUT_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or_else(default_flow_idle_timeout),
            repo_dir: std::env::var("REPO_DIR").map_or_else(|_| default_repo_dir(), PathBuf::from),
            support_contact: std::env::var("SUPPORT_CONTACT")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }

    /// Maximum artifact age before cleanup.
    #[must_use]
    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_days.saturating_mul(86_400))
    }

    /// Timeout applied to each account API call.
    #[must_use]
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// How long an unfinished flow may wait for the user's next message.
    #[must_use]
    pub fn flow_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_idle_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("Invalid API ID format (must be a positive integer)")]
    InvalidApiId,

    #[error("Invalid OWNER_ID format (must be a numeric user id)")]
    InvalidOwnerId,
}
