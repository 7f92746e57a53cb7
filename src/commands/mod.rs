//! Command handling module.
//!
//! Parses slash commands sent to the bot and routes everything else
//! into the user's session generation flow.

mod handler;
mod types;

pub use handler::CommandHandler;
pub use types::BotCommand;
