//! Errors surfaced while driving a conversation.

use thiserror::Error;

use crate::account::AccountError;
use crate::storage::{StoreError, UsageError};

/// Everything that can go wrong in a flow.
///
/// Only [`FlowError::InvalidFormat`] is recoverable; it re-prompts the same
/// step. The rest end the flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0}")]
    InvalidFormat(String),

    #[error("Too many attempts. Try again later.")]
    RateLimited,

    #[error("Authorization rejected: {0}")]
    AuthRejected(String),

    #[error("Two-step verification failed: {0}")]
    SecondFactorRejected(String),

    #[error("Connection problem: {0}")]
    TransportFailure(String),

    #[error("Storage failure: {0}")]
    Store(#[from] StoreError),

    #[error("Usage log failure: {0}")]
    Usage(#[from] UsageError),
}

impl From<AccountError> for FlowError {
    fn from(err: AccountError) -> Self {
        match err {
            // A remote shape complaint still ends the flow: the client is gone.
            AccountError::InvalidFormat(msg) | AccountError::AuthRejected(msg) => {
                Self::AuthRejected(msg)
            }
            AccountError::SecondFactorRejected(msg) => Self::SecondFactorRejected(msg),
            AccountError::Transport(msg) => Self::TransportFailure(msg),
        }
    }
}
