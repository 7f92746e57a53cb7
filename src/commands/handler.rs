//! Command handler implementation.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::types::BotCommand;
use crate::account::AccountConnector;
use crate::conversation::{
    ConversationService, ConversationState, FlowError, Outbound, StepOutcome,
};
use crate::storage::{CredentialStore, UsageLog};
use crate::telegram::{IncomingMessage, Outbox};
use crate::updater::SelfUpdater;

const SESSION_FILE_NAME: &str = "session.txt";
const BACKUP_CAPTION: &str = "🔐 Here's your session backup. Store it securely!";
const NO_FLOW_HINT: &str = "Use /genstring to generate your Telegram String Session.";

/// Routes messages to commands or to the user's active flow.
pub struct CommandHandler<C: AccountConnector> {
    /// In-flight session generation flows.
    conversations: Arc<ConversationService<C>>,

    /// Stored credential artifacts.
    credentials: CredentialStore,

    /// Usage statistics.
    usage: UsageLog,

    /// User allowed to run administrative commands.
    owner_id: i64,

    /// The bot's username, to ignore commands addressed to other bots.
    bot_username: Option<String>,

    /// Self-update support, if enabled.
    updater: Option<SelfUpdater>,
}

impl<C: AccountConnector> CommandHandler<C> {
    /// Creates a new command handler.
    #[must_use]
    pub fn new(
        conversations: Arc<ConversationService<C>>,
        credentials: CredentialStore,
        usage: UsageLog,
        owner_id: i64,
    ) -> Self {
        Self {
            conversations,
            credentials,
            usage,
            owner_id,
            bot_username: None,
            updater: None,
        }
    }

    /// Sets the bot's username.
    #[must_use]
    pub fn with_bot_username(mut self, username: Option<String>) -> Self {
        self.bot_username = username;
        self
    }

    /// Enables `/updatebot`.
    #[must_use]
    pub fn with_updater(mut self, updater: SelfUpdater) -> Self {
        self.updater = Some(updater);
        self
    }

    /// Handles one incoming message, replying through `out`.
    pub async fn handle(&self, message: &IncomingMessage, out: &dyn Outbox) {
        if let Some(command) = BotCommand::parse(&message.text, self.bot_username.as_deref()) {
            if self.accepts_command(command, message).await {
                debug!("User {} sent {}", message.user_id, command);
                self.execute(command, message, out).await;
                return;
            }
            debug!("User {} is entering a password; not parsing commands", message.user_id);
        }

        match self.conversations.submit(message.user_id, &message.text).await {
            Some(outcome) => self.deliver(message.user_id, outcome, out).await,
            None => reply(out, NO_FLOW_HINT).await,
        }
    }

    /// A password may start with `/`, so during two-step verification only a
    /// bare `/cancel` or `/genstring` counts as a command.
    async fn accepts_command(&self, command: BotCommand, message: &IncomingMessage) -> bool {
        let entering_password = self.conversations.state(message.user_id).await
            == Some(ConversationState::AwaitingSecondFactor);
        if !entering_password {
            return true;
        }
        command.interrupts_password_entry() && message.text.split_whitespace().count() == 1
    }

    /// Executes a parsed command.
    async fn execute(&self, command: BotCommand, message: &IncomingMessage, out: &dyn Outbox) {
        if command.is_owner_only() && message.user_id != self.owner_id {
            info!("Ignoring {} from non-owner {}", command, message.user_id);
            return;
        }

        match command {
            BotCommand::Start => self.handle_start(message, out).await,
            BotCommand::Help => reply(out, &help_text(message.user_id == self.owner_id)).await,
            BotCommand::GenString => self.handle_genstring(message.user_id, out).await,
            BotCommand::Cancel => self.handle_cancel(message.user_id, out).await,
            BotCommand::Revoke => self.handle_revoke(message.user_id, out).await,
            BotCommand::Stats => self.handle_stats(out).await,
            BotCommand::UpdateBot => self.handle_update(out).await,
        }
    }

    async fn handle_start(&self, message: &IncomingMessage, out: &dyn Outbox) {
        let text = format!("👋 Welcome {}!\n\n{NO_FLOW_HINT}", message.first_name);
        reply(out, &text).await;
    }

    async fn handle_genstring(&self, user_id: i64, out: &dyn Outbox) {
        match self.conversations.start(user_id).await {
            Ok(outcome) => self.deliver(user_id, outcome, out).await,
            Err(FlowError::RateLimited) => {
                reply(out, "🚫 Too many attempts. Try again later.").await;
            }
            Err(e) => reply(out, &self.conversations.error_text(&e)).await,
        }
    }

    async fn handle_cancel(&self, user_id: i64, out: &dyn Outbox) {
        match self.conversations.cancel(user_id).await {
            Some(outcome) => self.deliver(user_id, outcome, out).await,
            None => reply(out, "Nothing to cancel.").await,
        }
    }

    async fn handle_revoke(&self, user_id: i64, out: &dyn Outbox) {
        match self.credentials.delete(user_id) {
            Ok(true) => reply(out, "✅ Session revoked successfully!").await,
            Ok(false) => reply(out, "❌ No stored session to revoke.").await,
            Err(e) => {
                error!("Revoke failed for user {}: {}", user_id, e);
                reply(out, &self.conversations.error_text(&e.into())).await;
            }
        }
    }

    async fn handle_stats(&self, out: &dyn Outbox) {
        let counts = async {
            let users = self.usage.count_distinct_users().await?;
            let total = self.usage.count_total().await?;
            Ok::<_, FlowError>((users, total))
        };

        match counts.await {
            Ok((users, total)) => {
                let text = format!(
                    "📊 Usage Statistics:\n\
                     • Unique Users: {users}\n\
                     • Total Sessions Generated: {total}"
                );
                reply(out, &text).await;
            }
            Err(e) => {
                error!("Stats query failed: {}", e);
                reply(out, &self.conversations.error_text(&e)).await;
            }
        }
    }

    async fn handle_update(&self, out: &dyn Outbox) {
        let Some(updater) = &self.updater else {
            reply(out, "Self-update is not enabled.").await;
            return;
        };

        match updater.pull().await {
            Ok(outcome) if !outcome.changed => {
                reply(out, &format!("Already up to date.\n\n{}", outcome.output)).await;
            }
            Ok(outcome) => {
                reply(out, &format!("🔄 Updated, restarting...\n\n{}", outcome.output)).await;
                self.conversations.shutdown().await;
                let err = updater.restart();
                error!("Restart failed: {}", err);
                reply(out, &format!("❌ Restart failed: {err}")).await;
            }
            Err(e) => {
                warn!("Update failed: {}", e);
                reply(out, &format!("❌ Update failed: {e}")).await;
            }
        }
    }

    async fn deliver(&self, user_id: i64, outcome: StepOutcome, out: &dyn Outbox) {
        if outcome.state.is_terminal() {
            info!("Flow for user {} ended: {}", user_id, outcome.state);
        }
        match outcome.reply {
            Outbound::Text(text) => reply(out, &text).await,
            Outbound::SessionReady(session) => deliver_session(user_id, &session, out).await,
        }
    }
}

impl<C: AccountConnector> std::fmt::Debug for CommandHandler<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandler")
            .field("owner_id", &self.owner_id)
            .field("bot_username", &self.bot_username)
            .finish_non_exhaustive()
    }
}

/// Sends the session string inline and as a file.
///
/// If the inline message is refused, the bare string is sent as a last
/// resort. This can leave the secret in chat history, but a generated
/// credential is never dropped silently.
async fn deliver_session(user_id: i64, session: &str, out: &dyn Outbox) {
    let inline = format!(
        "✅ Your string session:\n\n{session}\n\n\
         ⚠️ Anyone with this string has full access to your account. \
         Never share it."
    );

    let inline_result = out.send_text(&inline).await;
    if let Err(e) = out
        .send_document(SESSION_FILE_NAME, session.as_bytes(), BACKUP_CAPTION)
        .await
    {
        warn!("Session backup file for user {} not sent: {}", user_id, e);
    }

    if let Err(e) = inline_result {
        warn!("Session message for user {} not sent ({}); sending raw string", user_id, e);
        if let Err(e) = out.send_text(session).await {
            error!("Could not deliver session string to user {}: {}", user_id, e);
        }
    }
}

fn help_text(is_owner: bool) -> String {
    let mut lines = vec!["Available commands:".to_owned()];
    for command in BotCommand::all() {
        if command.is_owner_only() && !is_owner {
            continue;
        }
        lines.push(format!("{command} - {}", command.description()));
    }
    lines.join("\n")
}

async fn reply(out: &dyn Outbox, text: &str) {
    if let Err(e) = out.send_text(text).await {
        warn!("Failed to send reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::account::SubmitOutcome;
    use crate::account::mock::{MockConnector, Script};
    use crate::telegram::recording::{RecordingOutbox, Sent};

    const OWNER: i64 = 1000;

    struct Fixture {
        _dir: TempDir,
        store: CredentialStore,
        usage: UsageLog,
        handler: CommandHandler<MockConnector>,
    }

    async fn fixture() -> Fixture {
        fixture_with(Script::default()).await
    }

    async fn fixture_with(script: Script) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("sessions")).unwrap();
        let usage = UsageLog::open(dir.path().join("analytics.db")).await.unwrap();
        let service = ConversationService::new(
            MockConnector::new(script),
            store.clone(),
            usage.clone(),
            3,
        )
        .with_remote_timeout(Duration::from_secs(5));
        let handler = CommandHandler::new(Arc::new(service), store.clone(), usage.clone(), OWNER)
            .with_bot_username(Some("StringBot".to_owned()));
        Fixture {
            _dir: dir,
            store,
            usage,
            handler,
        }
    }

    fn msg(user_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            user_id,
            first_name: "Ada".to_owned(),
            text: text.to_owned(),
        }
    }

    async fn run_flow(f: &Fixture, user: i64, out: &RecordingOutbox) {
        for text in ["/genstring", "123456", "abcHASH", "+15551234567", "1 2 3 4 5"] {
            f.handler.handle(&msg(user, text), out).await;
        }
    }

    #[tokio::test]
    async fn test_start_greets_by_name() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        f.handler.handle(&msg(1, "/start"), &out).await;
        assert!(out.texts()[0].starts_with("👋 Welcome Ada!"));
    }

    #[tokio::test]
    async fn test_text_without_flow_gets_hint() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        f.handler.handle(&msg(1, "hello"), &out).await;
        assert_eq!(out.texts(), vec![NO_FLOW_HINT.to_owned()]);
    }

    #[tokio::test]
    async fn test_full_flow_delivers_inline_and_document() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        run_flow(&f, 42, &out).await;

        let sent = out.sent();
        assert!(matches!(&sent[0], Sent::Text(t) if t.contains("API_ID")));
        assert!(
            sent.iter()
                .any(|s| matches!(s, Sent::Text(t) if t.contains("exported-session")))
        );
        assert!(sent.contains(&Sent::Document {
            file_name: "session.txt".to_owned(),
            contents: b"exported-session".to_vec(),
        }));
        assert!(f.store.get(42).unwrap().is_some());
        assert_eq!(f.usage.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refused_inline_message_falls_back_to_raw_string() {
        let f = fixture().await;
        let out = RecordingOutbox {
            refuse_text_containing: Some("Your string session".to_owned()),
            refuse_documents: true,
            ..RecordingOutbox::default()
        };
        run_flow(&f, 7, &out).await;

        assert_eq!(out.texts().last().unwrap(), "exported-session");
        assert_eq!(f.usage.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_message() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        for _ in 0..4 {
            f.handler.handle(&msg(5, "/genstring"), &out).await;
        }
        assert_eq!(out.texts().last().unwrap(), "🚫 Too many attempts. Try again later.");
    }

    #[tokio::test]
    async fn test_cancel() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        f.handler.handle(&msg(5, "/genstring"), &out).await;
        f.handler.handle(&msg(5, "/cancel"), &out).await;
        f.handler.handle(&msg(5, "123"), &out).await;
        f.handler.handle(&msg(5, "/cancel"), &out).await;

        let texts = out.texts();
        assert_eq!(texts[1], "✖️ Operation cancelled.");
        assert_eq!(texts[2], NO_FLOW_HINT);
        assert_eq!(texts[3], "Nothing to cancel.");
    }

    #[tokio::test]
    async fn test_password_starting_with_slash_is_not_a_command() {
        let f = fixture_with(Script {
            submit_code: Ok(SubmitOutcome::SecondFactorRequired { hint: None }),
            ..Script::default()
        })
        .await;
        let out = RecordingOutbox::default();
        run_flow(&f, 11, &out).await;
        assert!(out.texts().last().unwrap().contains("Two-step verification"));

        f.handler.handle(&msg(11, "/start x"), &out).await;

        assert!(out.texts().iter().all(|t| !t.starts_with("👋")));
        assert!(f.store.get(11).unwrap().is_some());
        assert_eq!(f.usage.count_total().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_still_works_during_password_entry() {
        let f = fixture_with(Script {
            submit_code: Ok(SubmitOutcome::SecondFactorRequired { hint: None }),
            ..Script::default()
        })
        .await;
        let out = RecordingOutbox::default();
        run_flow(&f, 12, &out).await;

        f.handler.handle(&msg(12, "/cancel"), &out).await;

        assert_eq!(out.texts().last().unwrap(), "✖️ Operation cancelled.");
        assert!(f.store.get(12).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_deletes_artifact() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        run_flow(&f, 9, &out).await;
        assert!(f.store.get(9).unwrap().is_some());

        f.handler.handle(&msg(9, "/revoke"), &out).await;
        f.handler.handle(&msg(9, "/revoke"), &out).await;

        let texts = out.texts();
        assert_eq!(texts[texts.len() - 2], "✅ Session revoked successfully!");
        assert_eq!(texts[texts.len() - 1], "❌ No stored session to revoke.");
        assert!(f.store.get(9).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stats_owner_only() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        run_flow(&f, 9, &out).await;

        let stranger = RecordingOutbox::default();
        f.handler.handle(&msg(9, "/stats"), &stranger).await;
        assert!(stranger.sent().is_empty());

        let owner = RecordingOutbox::default();
        f.handler.handle(&msg(OWNER, "/stats"), &owner).await;
        assert_eq!(
            owner.texts(),
            vec!["📊 Usage Statistics:\n• Unique Users: 1\n• Total Sessions Generated: 1".to_owned()]
        );
    }

    #[tokio::test]
    async fn test_updatebot_without_updater() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        f.handler.handle(&msg(OWNER, "/updatebot"), &out).await;
        assert_eq!(out.texts(), vec!["Self-update is not enabled.".to_owned()]);
    }

    #[tokio::test]
    async fn test_command_for_other_bot_goes_to_flow() {
        let f = fixture().await;
        let out = RecordingOutbox::default();
        f.handler.handle(&msg(3, "/genstring@OtherBot"), &out).await;
        assert_eq!(out.texts(), vec![NO_FLOW_HINT.to_owned()]);
    }

    #[test]
    fn test_help_hides_owner_commands() {
        assert!(!help_text(false).contains("/stats"));
        assert!(help_text(true).contains("/updatebot"));
        assert!(help_text(false).contains("/genstring"));
    }
}
