//! Command types and definitions.

use std::fmt;

/// Available bot commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    /// Greet the user.
    Start,

    /// Show help information.
    Help,

    /// Begin generating a session string.
    GenString,

    /// Abort the flow in progress.
    Cancel,

    /// Delete the caller's stored session.
    Revoke,

    /// Show usage statistics (owner only).
    Stats,

    /// Pull the latest code and restart (owner only).
    UpdateBot,
}

impl BotCommand {
    /// Parses a command from a message text.
    ///
    /// Accepts `/cmd` and `/cmd@botname`. A command addressed to a different
    /// bot, or an unknown command, yields `None`.
    #[must_use]
    pub fn parse(text: &str, bot_username: Option<&str>) -> Option<Self> {
        let text = text.trim();
        let after_slash = text.strip_prefix('/')?;

        let word = after_slash
            .split_whitespace()
            .next()
            .unwrap_or_default();

        let cmd = match word.split_once('@') {
            Some((cmd, target)) => {
                if let Some(me) = bot_username
                    && !target.eq_ignore_ascii_case(me.trim_start_matches('@'))
                {
                    return None;
                }
                cmd
            }
            None => word,
        };

        match cmd.to_lowercase().as_str() {
            "start" => Some(Self::Start),
            "help" => Some(Self::Help),
            "genstring" => Some(Self::GenString),
            "cancel" => Some(Self::Cancel),
            "revoke" => Some(Self::Revoke),
            "stats" => Some(Self::Stats),
            "updatebot" => Some(Self::UpdateBot),
            _ => None,
        }
    }

    /// Returns the command name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Help => "help",
            Self::GenString => "genstring",
            Self::Cancel => "cancel",
            Self::Revoke => "revoke",
            Self::Stats => "stats",
            Self::UpdateBot => "updatebot",
        }
    }

    /// Returns a short description of the command.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Start => "Show the welcome message",
            Self::Help => "Show this help message",
            Self::GenString => "Generate a Telegram string session",
            Self::Cancel => "Cancel the current operation",
            Self::Revoke => "Delete your stored session",
            Self::Stats => "Show usage statistics",
            Self::UpdateBot => "Pull the latest code and restart",
        }
    }

    /// Whether only the bot owner may run this command.
    #[must_use]
    pub const fn is_owner_only(self) -> bool {
        matches!(self, Self::Stats | Self::UpdateBot)
    }

    /// Whether this command may interrupt password entry.
    ///
    /// Anything else typed during two-step verification is taken as the
    /// password itself.
    #[must_use]
    pub const fn interrupts_password_entry(self) -> bool {
        matches!(self, Self::Cancel | Self::GenString)
    }

    /// Returns all commands in help order.
    #[must_use]
    pub const fn all() -> [Self; 7] {
        [
            Self::Start,
            Self::GenString,
            Self::Cancel,
            Self::Revoke,
            Self::Help,
            Self::Stats,
            Self::UpdateBot,
        ]
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}
