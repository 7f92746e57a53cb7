//! Telegram bot client wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use grammers_client::client::{UpdateStream, UpdatesConfiguration};
use grammers_client::message::{InputMessage, Message};
use grammers_client::peer::Peer;
use grammers_client::update::Update;
use grammers_client::{Client, SenderPool, sender};
use grammers_session::storages::SqliteSession;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{DeliveryError, Outbox};
use crate::config::TelegramConfig;

/// Errors that can occur while running the bot connection.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Bot sign in failed: {0}")]
    SignIn(String),

    #[error("Update stream failed: {0}")]
    Updates(String),
}

/// A private message addressed to the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user_id: i64,
    pub first_name: String,
    pub text: String,
}

/// The bot's own Telegram connection.
pub struct BotClient {
    /// The underlying grammers client.
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Background task running the sender pool.
    _pool_task: JoinHandle<()>,
}

impl BotClient {
    /// Connects and signs in as the bot if the stored session is not
    /// authorized yet. Returns the client and its update stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened, the connection fails
    /// or the bot token is rejected.
    pub async fn connect(config: &TelegramConfig) -> Result<(Self, BotUpdates), BotError> {
        info!("Connecting to Telegram...");

        let session = Arc::new(
            SqliteSession::open(&config.session_path)
                .await
                .map_err(|e| BotError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), config.api_id);

        let client = Client::new(handle.clone());

        // Spawn the sender pool runner
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let is_authorized = client
            .is_authorized()
            .await
            .map_err(|e| BotError::Connection(e.to_string()))?;

        if !is_authorized {
            info!("Signing in as bot...");
            client
                .bot_sign_in(&config.bot_token, &config.api_hash)
                .await
                .map_err(|e| BotError::SignIn(e.to_string()))?;
        }

        info!("Connected to Telegram as bot");

        let stream = client
            .stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            )
            .await;

        let bot = Self {
            client: client.clone(),
            handle: handle.thin,
            _pool_task: pool_task,
        };
        Ok((bot, BotUpdates { client, stream }))
    }

    /// Disconnects from Telegram.
    pub fn disconnect(&self) {
        info!("Disconnecting from Telegram...");
        self.handle.quit();
    }

    /// Returns a reference to the underlying client for advanced operations.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl std::fmt::Debug for BotClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotClient").finish_non_exhaustive()
    }
}

/// Incoming updates, filtered down to user messages.
pub struct BotUpdates {
    client: Client,
    stream: UpdateStream,
}

impl BotUpdates {
    /// Waits for the next private message from a user.
    pub async fn next_message(&mut self) -> Result<(IncomingMessage, MessageOutbox), BotError> {
        loop {
            let update = self
                .stream
                .next()
                .await
                .map_err(|e| BotError::Updates(e.to_string()))?;

            let Update::NewMessage(message) = update else {
                continue;
            };
            if message.outgoing() {
                continue;
            }

            let Some(Peer::User(user)) = message.sender() else {
                debug!("Ignoring message without a user sender");
                continue;
            };

            let incoming = IncomingMessage {
                user_id: user.id(),
                first_name: user.first_name().unwrap_or("there").to_owned(),
                text: message.text().to_owned(),
            };
            let outbox = MessageOutbox {
                client: self.client.clone(),
                message,
            };
            return Ok((incoming, outbox));
        }
    }
}

/// Replies to one received message.
pub struct MessageOutbox {
    client: Client,
    message: Message,
}

#[async_trait]
impl Outbox for MessageOutbox {
    async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
        self.message
            .reply(InputMessage::new().text(text))
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Telegram(e.to_string()))
    }

    async fn send_document(
        &self,
        file_name: &str,
        contents: &[u8],
        caption: &str,
    ) -> Result<(), DeliveryError> {
        // The upload takes its name from the path, so the file lives in a
        // private directory that disappears when this call returns.
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(file_name);
        tokio::fs::write(&path, contents).await?;

        let uploaded = self
            .client
            .upload_file(&path)
            .await
            .map_err(|e| DeliveryError::Telegram(e.to_string()))?;

        self.message
            .reply(InputMessage::new().text(caption).document(uploaded))
            .await
            .map(|_| ())
            .map_err(|e| DeliveryError::Telegram(e.to_string()))
    }
}
