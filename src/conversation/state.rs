//! Conversation states and the input grammar of each step.

use std::fmt;

use super::FlowError;
use crate::account::AccountHandle;

/// How a flow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Cancelled,
    Failed,
}

/// Externally visible position of a user's flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    AwaitingApiId,
    AwaitingApiHash,
    AwaitingPhone,
    AwaitingCode,
    AwaitingSecondFactor,
    Terminal(Termination),
}

impl ConversationState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminal(_))
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AwaitingApiId => "awaiting_api_id",
            Self::AwaitingApiHash => "awaiting_api_hash",
            Self::AwaitingPhone => "awaiting_phone",
            Self::AwaitingCode => "awaiting_code",
            Self::AwaitingSecondFactor => "awaiting_second_factor",
            Self::Terminal(Termination::Success) => "done",
            Self::Terminal(Termination::Cancelled) => "cancelled",
            Self::Terminal(Termination::Failed) => "failed",
        };
        f.write_str(name)
    }
}

/// In-flight data for one user. The remote client only exists in the
/// variants that need it, so it cannot outlive those steps unnoticed.
pub(crate) enum Flow<H: AccountHandle> {
    AwaitingApiId,
    AwaitingApiHash {
        api_id: i32,
    },
    AwaitingPhone {
        api_id: i32,
        api_hash: String,
    },
    AwaitingCode {
        phone: String,
        client: H,
        ticket: H::Ticket,
    },
    AwaitingSecondFactor {
        client: H,
    },
}

impl<H: AccountHandle> Flow<H> {
    pub(crate) fn state(&self) -> ConversationState {
        match self {
            Self::AwaitingApiId => ConversationState::AwaitingApiId,
            Self::AwaitingApiHash { .. } => ConversationState::AwaitingApiHash,
            Self::AwaitingPhone { .. } => ConversationState::AwaitingPhone,
            Self::AwaitingCode { .. } => ConversationState::AwaitingCode,
            Self::AwaitingSecondFactor { .. } => ConversationState::AwaitingSecondFactor,
        }
    }

    /// Closes the remote client, if this step holds one.
    pub(crate) async fn release(self) {
        match self {
            Self::AwaitingCode { mut client, .. } | Self::AwaitingSecondFactor { mut client } => {
                client.close().await;
            }
            Self::AwaitingApiId | Self::AwaitingApiHash { .. } | Self::AwaitingPhone { .. } => {}
        }
    }
}

/// A positive decimal `api_id`.
pub(crate) fn parse_api_id(text: &str) -> Result<i32, FlowError> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FlowError::InvalidFormat(
            "API_ID must contain digits only.".to_owned(),
        ));
    }
    text.parse::<i32>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| FlowError::InvalidFormat("API_ID is out of range.".to_owned()))
}

/// Any non-blank `api_hash`.
pub(crate) fn parse_api_hash(text: &str) -> Result<String, FlowError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(FlowError::InvalidFormat("API_HASH cannot be empty.".to_owned()));
    }
    Ok(text.to_owned())
}

/// Optional leading `+` followed by digits.
pub(crate) fn parse_phone(text: &str) -> Result<String, FlowError> {
    let text = text.trim();
    let digits = text.strip_prefix('+').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FlowError::InvalidFormat(
            "Send the phone number in international format, e.g. +15551234567.".to_owned(),
        ));
    }
    Ok(text.to_owned())
}

/// Digits only; whitespace between digits is dropped so users can send
/// `1 2 3 4 5` (Telegram expires codes it sees pasted verbatim in a chat).
pub(crate) fn parse_code(text: &str) -> Result<String, FlowError> {
    let code: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FlowError::InvalidFormat(
            "The login code must contain digits only.".to_owned(),
        ));
    }
    Ok(code)
}

/// Any non-blank password, kept verbatim.
pub(crate) fn parse_secret(text: &str) -> Result<&str, FlowError> {
    if text.trim().is_empty() {
        return Err(FlowError::InvalidFormat("The password cannot be empty.".to_owned()));
    }
    Ok(text)
}
