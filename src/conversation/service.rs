//! The session generation flow.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::attempts::AttemptCounter;
use super::state::{
    Flow, parse_api_hash, parse_api_id, parse_code, parse_phone, parse_secret,
};
use super::{ConversationState, FlowError, Termination};
use crate::account::{AccountConnector, AccountError, AccountHandle, SubmitOutcome};
use crate::storage::{CredentialArtifact, CredentialStore, UsageLog};
use crate::telegram::mask_phone;

const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

const PROMPT_API_ID: &str = "Let's generate your string session!\nPlease send your API_ID:";
const PROMPT_API_HASH: &str = "Now send your API_HASH:";
const PROMPT_PHONE: &str =
    "Send the phone number of the account in international format (e.g. +15551234567):";
const PROMPT_CODE: &str = "A login code was sent to your Telegram app.\n\
     Send it with spaces between the digits (e.g. 1 2 3 4 5), \
     otherwise Telegram may expire it:";
const PROMPT_SECOND_FACTOR: &str =
    "Two-step verification is enabled. Send your password:";
const CANCELLED: &str = "✖️ Operation cancelled.";

/// What the bot should send back after a step.
#[derive(Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Plain reply: a prompt, a re-prompt or an error.
    Text(String),

    /// The flow produced a session string that must reach the user.
    SessionReady(String),
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::SessionReady(_) => f.write_str("SessionReady(..)"),
        }
    }
}

/// Result of feeding one message into a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub state: ConversationState,
    pub reply: Outbound,
}

type Step<H> = (Option<Flow<H>>, StepOutcome);

/// A flow waiting for the user's next message.
struct Parked<H: AccountHandle> {
    flow: Flow<H>,
    since: Instant,
}

impl<H: AccountHandle> Parked<H> {
    fn new(flow: Flow<H>) -> Self {
        Self {
            flow,
            since: Instant::now(),
        }
    }
}

/// Owns every user's in-flight flow and the attempt counter.
///
/// Flows are taken out of the map while a step runs, so no lock is held
/// across a network call and other users keep progressing.
pub struct ConversationService<C: AccountConnector> {
    connector: C,
    credentials: CredentialStore,
    usage: UsageLog,
    attempts: AttemptCounter,
    flows: Mutex<HashMap<i64, Parked<C::Handle>>>,
    remote_timeout: Duration,
    support_contact: Option<String>,
}

impl<C: AccountConnector> ConversationService<C> {
    /// Creates the service.
    #[must_use]
    pub fn new(
        connector: C,
        credentials: CredentialStore,
        usage: UsageLog,
        max_attempts: u32,
    ) -> Self {
        Self {
            connector,
            credentials,
            usage,
            attempts: AttemptCounter::new(max_attempts),
            flows: Mutex::new(HashMap::new()),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            support_contact: None,
        }
    }

    /// Sets the timeout applied to every account API call.
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Sets who users should contact when errors persist.
    #[must_use]
    pub fn with_support_contact(mut self, contact: Option<String>) -> Self {
        self.support_contact = contact;
        self
    }

    /// Begins a new flow for `user_id`, discarding any unfinished one.
    pub async fn start(&self, user_id: i64) -> Result<StepOutcome, FlowError> {
        if self.attempts.try_acquire(user_id).await.is_none() {
            return Err(FlowError::RateLimited);
        }

        let prior = self
            .flows
            .lock()
            .await
            .insert(user_id, Parked::new(Flow::AwaitingApiId));
        if let Some(Parked { flow, .. }) = prior {
            info!("User {} restarted; discarding flow at {}", user_id, flow.state());
            flow.release().await;
        }

        info!("User {} started session generation", user_id);
        Ok(StepOutcome {
            state: ConversationState::AwaitingApiId,
            reply: Outbound::Text(PROMPT_API_ID.to_owned()),
        })
    }

    /// Feeds a message into the user's flow.
    ///
    /// Returns `None` if the user has no active flow.
    pub async fn submit(&self, user_id: i64, text: &str) -> Option<StepOutcome> {
        let flow = self.flows.lock().await.remove(&user_id)?.flow;
        let from = flow.state();

        let (next, outcome) = self.step(user_id, flow, text).await;
        debug!("User {}: {} -> {}", user_id, from, outcome.state);

        if let Some(next) = next {
            self.park(user_id, next).await;
        }
        Some(outcome)
    }

    /// Aborts the user's flow, closing its client.
    ///
    /// Returns `None` if the user has no active flow.
    pub async fn cancel(&self, user_id: i64) -> Option<StepOutcome> {
        let flow = self.flows.lock().await.remove(&user_id)?.flow;
        info!("User {} cancelled at {}", user_id, flow.state());
        flow.release().await;

        Some(StepOutcome {
            state: ConversationState::Terminal(Termination::Cancelled),
            reply: Outbound::Text(CANCELLED.to_owned()),
        })
    }

    /// Current state of the user's flow, if any.
    pub async fn state(&self, user_id: i64) -> Option<ConversationState> {
        self.flows
            .lock()
            .await
            .get(&user_id)
            .map(|parked| parked.flow.state())
    }

    /// Drops flows that have waited at least `max_idle` for input.
    ///
    /// Flows in the middle of a step are not in the map and are never
    /// touched. Returns how many flows were dropped.
    pub async fn expire_idle(&self, max_idle: Duration) -> usize {
        let stale: Vec<(i64, Flow<C::Handle>)> = {
            let mut flows = self.flows.lock().await;
            let ids: Vec<i64> = flows
                .iter()
                .filter(|(_, parked)| parked.since.elapsed() >= max_idle)
                .map(|(user_id, _)| *user_id)
                .collect();
            ids.into_iter()
                .filter_map(|user_id| flows.remove(&user_id).map(|p| (user_id, p.flow)))
                .collect()
        };

        let expired = stale.len();
        for (user_id, flow) in stale {
            info!("Flow for user {} expired at {}", user_id, flow.state());
            flow.release().await;
        }
        expired
    }

    /// Attempts the user has used so far.
    pub async fn attempts_used(&self, user_id: i64) -> u32 {
        self.attempts.used(user_id).await
    }

    /// Closes every in-flight remote client.
    pub async fn shutdown(&self) {
        let flows: Vec<_> = self.flows.lock().await.drain().map(|(_, p)| p.flow).collect();
        if !flows.is_empty() {
            info!("Closing {} unfinished flow(s)", flows.len());
        }
        for flow in flows {
            flow.release().await;
        }
    }

    /// User-facing rendering of a fatal error.
    #[must_use]
    pub fn error_text(&self, err: &FlowError) -> String {
        match &self.support_contact {
            Some(contact) => format!(
                "❌ Error: {err}\n\nIf the issue persists, please contact {contact} for support."
            ),
            None => format!("❌ Error: {err}"),
        }
    }

    /// Puts a flow back unless a newer one took its place meanwhile.
    async fn park(&self, user_id: i64, flow: Flow<C::Handle>) {
        let displaced = match self.flows.lock().await.entry(user_id) {
            Entry::Vacant(slot) => {
                slot.insert(Parked::new(flow));
                None
            }
            Entry::Occupied(_) => Some(flow),
        };
        if let Some(flow) = displaced {
            warn!("User {} started a new flow mid-step; dropping the old one", user_id);
            flow.release().await;
        }
    }

    async fn step(&self, user_id: i64, flow: Flow<C::Handle>, text: &str) -> Step<C::Handle> {
        match flow {
            Flow::AwaitingApiId => match parse_api_id(text) {
                Ok(api_id) => advance(Flow::AwaitingApiHash { api_id }, PROMPT_API_HASH),
                Err(e) => reprompt(Flow::AwaitingApiId, &e, PROMPT_API_ID),
            },
            Flow::AwaitingApiHash { api_id } => match parse_api_hash(text) {
                Ok(api_hash) => advance(Flow::AwaitingPhone { api_id, api_hash }, PROMPT_PHONE),
                Err(e) => reprompt(Flow::AwaitingApiHash { api_id }, &e, PROMPT_API_HASH),
            },
            Flow::AwaitingPhone { api_id, api_hash } => match parse_phone(text) {
                Ok(phone) => self.request_code(user_id, api_id, &api_hash, phone).await,
                Err(e) => reprompt(Flow::AwaitingPhone { api_id, api_hash }, &e, PROMPT_PHONE),
            },
            Flow::AwaitingCode {
                phone,
                client,
                ticket,
            } => match parse_code(text) {
                Ok(code) => self.submit_code(user_id, &phone, client, &ticket, &code).await,
                Err(e) => reprompt(
                    Flow::AwaitingCode {
                        phone,
                        client,
                        ticket,
                    },
                    &e,
                    PROMPT_CODE,
                ),
            },
            Flow::AwaitingSecondFactor { client } => match parse_secret(text) {
                Ok(secret) => self.submit_second_factor(user_id, client, secret).await,
                Err(e) => reprompt(
                    Flow::AwaitingSecondFactor { client },
                    &e,
                    PROMPT_SECOND_FACTOR,
                ),
            },
        }
    }

    async fn request_code(
        &self,
        user_id: i64,
        api_id: i32,
        api_hash: &str,
        phone: String,
    ) -> Step<C::Handle> {
        let mut client = match self
            .remote(self.connector.open(api_id, api_hash, user_id))
            .await
        {
            Ok(client) => client,
            Err(e) => return self.fail(user_id, None, e.into()).await,
        };

        match self.remote(client.request_code(&phone)).await {
            Ok(ticket) => {
                info!("Login code sent for user {} ({})", user_id, mask_phone(&phone));
                advance(
                    Flow::AwaitingCode {
                        phone,
                        client,
                        ticket,
                    },
                    PROMPT_CODE,
                )
            }
            Err(e) => self.fail(user_id, Some(client), e.into()).await,
        }
    }

    async fn submit_code(
        &self,
        user_id: i64,
        phone: &str,
        mut client: C::Handle,
        ticket: &<C::Handle as AccountHandle>::Ticket,
        code: &str,
    ) -> Step<C::Handle> {
        match self.remote(client.submit_code(ticket, code)).await {
            Ok(SubmitOutcome::Authenticated) => {
                info!("User {} signed in as {}", user_id, mask_phone(phone));
                self.finalize(user_id, client).await
            }
            Ok(SubmitOutcome::SecondFactorRequired { hint }) => {
                let prompt = match hint {
                    Some(hint) if !hint.is_empty() => {
                        format!("{PROMPT_SECOND_FACTOR}\n(Hint: {hint})")
                    }
                    _ => PROMPT_SECOND_FACTOR.to_owned(),
                };
                (
                    Some(Flow::AwaitingSecondFactor { client }),
                    StepOutcome {
                        state: ConversationState::AwaitingSecondFactor,
                        reply: Outbound::Text(prompt),
                    },
                )
            }
            Err(e) => self.fail(user_id, Some(client), e.into()).await,
        }
    }

    async fn submit_second_factor(
        &self,
        user_id: i64,
        mut client: C::Handle,
        secret: &str,
    ) -> Step<C::Handle> {
        match self.remote(client.submit_second_factor(secret)).await {
            Ok(()) => {
                info!("User {} passed two-step verification", user_id);
                self.finalize(user_id, client).await
            }
            Err(e) => self.fail(user_id, Some(client), e.into()).await,
        }
    }

    /// Exports the string, records it, and always closes the client.
    ///
    /// Bookkeeping failures are logged only: the produced string is still
    /// handed back for delivery.
    async fn finalize(&self, user_id: i64, mut client: C::Handle) -> Step<C::Handle> {
        let exported = self.remote(client.export_session_string()).await;
        client.close().await;

        let session = match exported {
            Ok(session) => session,
            Err(e) => return self.fail(user_id, None, e.into()).await,
        };
        info!("Session string generated for user {}", user_id);

        if let Err(e) = self.usage.record(user_id, Utc::now().timestamp()).await {
            error!("Failed to record usage for user {}: {}", user_id, e);
        }
        if let Err(e) = self
            .credentials
            .put(&CredentialArtifact::new(user_id, session.clone()))
        {
            error!("Failed to store credential for user {}: {}", user_id, e);
        }

        (
            None,
            StepOutcome {
                state: ConversationState::Terminal(Termination::Success),
                reply: Outbound::SessionReady(session),
            },
        )
    }

    async fn fail(
        &self,
        user_id: i64,
        client: Option<C::Handle>,
        err: FlowError,
    ) -> Step<C::Handle> {
        if let Some(mut client) = client {
            client.close().await;
        }
        warn!("Flow for user {} failed: {}", user_id, err);

        (
            None,
            StepOutcome {
                state: ConversationState::Terminal(Termination::Failed),
                reply: Outbound::Text(self.error_text(&err)),
            },
        )
    }

    async fn remote<T>(
        &self,
        call: impl Future<Output = Result<T, AccountError>>,
    ) -> Result<T, AccountError> {
        tokio::time::timeout(self.remote_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(AccountError::Transport(format!(
                    "Telegram did not respond within {}s",
                    self.remote_timeout.as_secs_f32()
                )))
            })
    }
}

impl<C: AccountConnector> std::fmt::Debug for ConversationService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationService")
            .field("attempts", &self.attempts)
            .field("remote_timeout", &self.remote_timeout)
            .finish_non_exhaustive()
    }
}

fn advance<H: AccountHandle>(next: Flow<H>, prompt: &str) -> Step<H> {
    let state = next.state();
    (
        Some(next),
        StepOutcome {
            state,
            reply: Outbound::Text(prompt.to_owned()),
        },
    )
}

fn reprompt<H: AccountHandle>(same: Flow<H>, err: &FlowError, prompt: &str) -> Step<H> {
    let state = same.state();
    (
        Some(same),
        StepOutcome {
            state,
            reply: Outbound::Text(format!("⚠️ {err}\n\n{prompt}")),
        },
    )
}
