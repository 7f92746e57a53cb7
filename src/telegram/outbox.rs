//! Outgoing replies.

use async_trait::async_trait;
use thiserror::Error;

/// Failure to deliver a reply.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Telegram refused the message: {0}")]
    Telegram(String),

    #[error("Could not prepare attachment: {0}")]
    Io(#[from] std::io::Error),
}

/// Where replies to one incoming message go.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError>;

    /// Sends `contents` as a file attachment named `file_name`.
    async fn send_document(
        &self,
        file_name: &str,
        contents: &[u8],
        caption: &str,
    ) -> Result<(), DeliveryError>;
}
