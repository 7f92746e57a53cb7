//! Telegram bot connection.
//!
//! Logs the bot in, turns raw updates into [`IncomingMessage`]s and
//! delivers replies through the [`Outbox`] trait.

mod client;
mod outbox;

pub use client::{BotClient, BotError, BotUpdates, IncomingMessage, MessageOutbox};
pub use outbox::{DeliveryError, Outbox};
#[cfg(test)]
pub(crate) use outbox::recording;

/// Masks a phone number for logging (shows last 4 digits).
#[must_use]
pub fn mask_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 4 {
        format!("***{}", &digits[digits.len() - 4..])
    } else {
        "****".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1234567890"), "***7890");
        assert_eq!(mask_phone("123"), "****");
        assert_eq!(mask_phone("+7 (999) 123-45-67"), "***4567");
    }
}
