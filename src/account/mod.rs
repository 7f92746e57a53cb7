//! Account API client adapter.
//!
//! Hides the lifecycle of a user-account MTProto connection behind two traits
//! so the conversation logic can be driven against a scripted fake in tests.

mod grammers;
#[cfg(test)]
pub(crate) mod mock;
mod session_string;

use async_trait::async_trait;
use thiserror::Error;

pub use grammers::{GrammersAccount, GrammersConnector};
pub use session_string::{SessionString, SessionStringError};

/// Errors reported by the account API adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// The remote side refused a value because of its shape (e.g. phone number).
    #[error("{0}")]
    InvalidFormat(String),

    /// API credentials, phone number or login code were rejected.
    #[error("{0}")]
    AuthRejected(String),

    /// The two-step verification password was rejected.
    #[error("{0}")]
    SecondFactorRejected(String),

    /// Connection, timeout or unexpected protocol failure.
    #[error("{0}")]
    Transport(String),
}

/// Outcome of submitting a login code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The account is signed in.
    Authenticated,

    /// Two-step verification is enabled; a password must follow.
    SecondFactorRequired { hint: Option<String> },
}

/// Opens account API connections.
#[async_trait]
pub trait AccountConnector: Send + Sync + 'static {
    type Handle: AccountHandle;

    /// Creates a client for the given credentials and connects it.
    ///
    /// No connection is left open when this fails.
    async fn open(
        &self,
        api_id: i32,
        api_hash: &str,
        user_id: i64,
    ) -> Result<Self::Handle, AccountError>;
}

/// One live account API connection, exclusively owned by a conversation.
#[async_trait]
pub trait AccountHandle: Send + 'static {
    /// Opaque value returned by the code request and needed to sign in.
    type Ticket: Send + Sync + 'static;

    async fn request_code(&mut self, phone: &str) -> Result<Self::Ticket, AccountError>;

    async fn submit_code(
        &mut self,
        ticket: &Self::Ticket,
        code: &str,
    ) -> Result<SubmitOutcome, AccountError>;

    async fn submit_second_factor(&mut self, secret: &str) -> Result<(), AccountError>;

    async fn export_session_string(&mut self) -> Result<String, AccountError>;

    /// Disconnects. Idempotent and safe on a handle that never connected.
    async fn close(&mut self);
}
