//! `grammers`-backed account client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::client::{LoginToken, PasswordToken};
use grammers_client::{Client, InvocationError, SenderPool, SignInError, sender};
use grammers_session::Session;
use grammers_session::storages::SqliteSession;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{AccountConnector, AccountError, AccountHandle, SessionString, SubmitOutcome};
use crate::telegram::mask_phone;

/// How long `close` waits for the sender pool to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Opens user-account connections with `grammers`.
///
/// Every connection gets a throwaway session database in a private temporary
/// directory; the only thing that outlives the connection is the exported
/// session string.
#[derive(Debug, Default, Clone)]
pub struct GrammersConnector;

impl GrammersConnector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AccountConnector for GrammersConnector {
    type Handle = GrammersAccount;

    async fn open(
        &self,
        api_id: i32,
        api_hash: &str,
        user_id: i64,
    ) -> Result<GrammersAccount, AccountError> {
        info!("Opening account client for user {}", user_id);

        let scratch = tempfile::Builder::new()
            .prefix(&format!("account-{user_id}-"))
            .tempdir()
            .map_err(|e| AccountError::Transport(format!("Could not create session storage: {e}")))?;

        let session = Arc::new(
            SqliteSession::open(scratch.path().join("account.session"))
                .await
                .map_err(|e| AccountError::Transport(format!("Session error: {e}")))?,
        );

        let SenderPool {
            runner,
            updates: _,
            handle,
        } = SenderPool::new(Arc::clone(&session), api_id);

        let client = Client::new(handle.clone());
        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let mut account = GrammersAccount {
            client,
            handle: handle.thin,
            session,
            pool_task: Some(pool_task),
            scratch: Some(scratch),
            api_id,
            api_hash: api_hash.to_owned(),
            password: None,
            account_user_id: None,
            closed: false,
        };

        // Forces the first round-trip so a bad api_id or a dead network shows
        // up here rather than at the code request.
        if let Err(e) = account.client.is_authorized().await {
            account.close().await;
            return Err(classify_invocation(&e));
        }

        debug!("Account client for user {} connected", user_id);
        Ok(account)
    }
}

/// A connected user-account client.
pub struct GrammersAccount {
    client: Client,
    handle: sender::SenderPoolHandle,
    session: Arc<SqliteSession>,
    pool_task: Option<JoinHandle<()>>,
    scratch: Option<TempDir>,
    api_id: i32,
    api_hash: String,
    password: Option<PasswordToken>,
    account_user_id: Option<i64>,
    closed: bool,
}

impl GrammersAccount {
    async fn fail<T>(&mut self, err: AccountError) -> Result<T, AccountError> {
        self.close().await;
        Err(err)
    }
}

#[async_trait]
impl AccountHandle for GrammersAccount {
    type Ticket = LoginToken;

    async fn request_code(&mut self, phone: &str) -> Result<LoginToken, AccountError> {
        info!("Requesting login code for phone: {}...", mask_phone(phone));

        match self.client.request_login_code(phone, &self.api_hash).await {
            Ok(token) => Ok(token),
            Err(e) => {
                let err = classify_invocation(&e);
                warn!("Login code request failed: {}", err);
                self.fail(err).await
            }
        }
    }

    async fn submit_code(
        &mut self,
        ticket: &LoginToken,
        code: &str,
    ) -> Result<SubmitOutcome, AccountError> {
        info!("Signing in with login code...");

        match self.client.sign_in(ticket, code).await {
            Ok(user) => {
                self.account_user_id = Some(user.id());
                Ok(SubmitOutcome::Authenticated)
            }
            Err(SignInError::PasswordRequired(password_token)) => {
                debug!("2FA password required");
                let hint = password_token.hint().map(str::to_owned);
                self.password = Some(password_token);
                Ok(SubmitOutcome::SecondFactorRequired { hint })
            }
            Err(SignInError::InvalidCode) => {
                self.fail(AccountError::AuthRejected(
                    "The login code is invalid or has expired.".to_owned(),
                ))
                .await
            }
            Err(SignInError::SignUpRequired { .. }) => {
                self.fail(AccountError::AuthRejected(
                    "This phone number has no Telegram account.".to_owned(),
                ))
                .await
            }
            Err(SignInError::Other(e)) => {
                let err = classify_invocation(&e);
                self.fail(err).await
            }
            Err(e) => self.fail(AccountError::AuthRejected(e.to_string())).await,
        }
    }

    async fn submit_second_factor(&mut self, secret: &str) -> Result<(), AccountError> {
        info!("Checking 2FA password...");

        let Some(token) = self.password.take() else {
            return self
                .fail(AccountError::Transport(
                    "No password challenge is pending.".to_owned(),
                ))
                .await;
        };

        match self.client.check_password(token, secret).await {
            Ok(user) => {
                self.account_user_id = Some(user.id());
                Ok(())
            }
            Err(SignInError::InvalidPassword(_)) => {
                self.fail(AccountError::SecondFactorRejected(
                    "The two-step verification password is incorrect.".to_owned(),
                ))
                .await
            }
            Err(SignInError::Other(e)) => {
                let err = match classify_invocation(&e) {
                    AccountError::Transport(msg) => AccountError::Transport(msg),
                    other => AccountError::SecondFactorRejected(other.to_string()),
                };
                self.fail(err).await
            }
            Err(e) => {
                self.fail(AccountError::SecondFactorRejected(e.to_string()))
                    .await
            }
        }
    }

    async fn export_session_string(&mut self) -> Result<String, AccountError> {
        let Some(user_id) = self.account_user_id else {
            return self
                .fail(AccountError::Transport("The account is not signed in.".to_owned()))
                .await;
        };

        let dc_id = self.session.home_dc_id();
        let auth_key = self.session.dc_option(dc_id).and_then(|dc| dc.auth_key);

        let (Some(auth_key), Ok(dc_id), Ok(api_id), Ok(user_id)) = (
            auth_key,
            u8::try_from(dc_id),
            u32::try_from(self.api_id),
            u64::try_from(user_id),
        ) else {
            return self
                .fail(AccountError::Transport(
                    "The session has no usable authorization key.".to_owned(),
                ))
                .await;
        };

        Ok(SessionString {
            dc_id,
            api_id,
            test_mode: false,
            auth_key,
            user_id,
            is_bot: false,
        }
        .encode())
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        debug!("Disconnecting account client...");
        self.handle.quit();
        if let Some(task) = self.pool_task.take()
            && tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err()
        {
            warn!("Account sender pool did not stop in time");
        }
        // Dropping the directory removes the scratch session database.
        self.scratch.take();
    }
}

impl Drop for GrammersAccount {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Account client dropped without close; disconnecting");
            self.handle.quit();
        }
    }
}

impl std::fmt::Debug for GrammersAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersAccount")
            .field("api_id", &self.api_id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn classify_invocation(err: &InvocationError) -> AccountError {
    classify_rpc_message(&err.to_string())
}

/// Maps an RPC error description onto the adapter's error kinds.
fn classify_rpc_message(message: &str) -> AccountError {
    const AUTH_REJECTED: &[(&str, &str)] = &[
        ("API_ID_INVALID", "The API_ID/API_HASH combination is invalid."),
        ("API_ID_PUBLISHED_FLOOD", "This API_ID is published and has been disabled."),
        ("PHONE_NUMBER_BANNED", "This phone number is banned from Telegram."),
        ("PHONE_NUMBER_FLOOD", "Too many login attempts for this number; try again later."),
        ("PHONE_CODE_INVALID", "The login code is invalid."),
        ("PHONE_CODE_EXPIRED", "The login code has expired."),
        ("PHONE_CODE_EMPTY", "The login code is empty."),
        ("AUTH_RESTART", "Telegram asked to restart the login; please try again."),
    ];
    const INVALID_FORMAT: &[(&str, &str)] = &[
        ("PHONE_NUMBER_INVALID", "The phone number is invalid."),
        ("PHONE_NUMBER_UNOCCUPIED", "This phone number has no Telegram account."),
    ];

    for (code, text) in AUTH_REJECTED {
        if message.contains(code) {
            return AccountError::AuthRejected((*text).to_owned());
        }
    }
    for (code, text) in INVALID_FORMAT {
        if message.contains(code) {
            return AccountError::InvalidFormat((*text).to_owned());
        }
    }
    // Temporary server-side throttling, not a verdict on the credentials.
    if message.contains("FLOOD_WAIT") {
        return AccountError::Transport(format!("Telegram rate limit hit: {message}"));
    }
    if message.contains("PASSWORD_HASH_INVALID") {
        return AccountError::SecondFactorRejected(
            "The two-step verification password is incorrect.".to_owned(),
        );
    }

    AccountError::Transport(message.to_owned())
}
