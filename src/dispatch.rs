//! Per-user message dispatch.
//!
//! Every user gets a worker task fed by its own channel. A user's messages are
//! handled one at a time and in order, while different users' workers run
//! concurrently, so a slow login call only holds up its own user.
//!
//! A worker that went idle may still be finishing queued messages when its
//! user writes again; the replacement waits for it before starting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::account::AccountConnector;
use crate::commands::CommandHandler;
use crate::telegram::{IncomingMessage, Outbox};

/// Idle workers exit after this long and are re-spawned on demand.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

type Job = (IncomingMessage, Box<dyn Outbox>);

struct Worker {
    tx: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

/// Hands incoming messages to per-user workers.
pub struct Dispatcher<C: AccountConnector> {
    handler: Arc<CommandHandler<C>>,
    workers: HashMap<i64, Worker>,
    idle_timeout: Duration,
}

impl<C: AccountConnector> Dispatcher<C> {
    #[must_use]
    pub fn new(handler: Arc<CommandHandler<C>>) -> Self {
        Self {
            handler,
            workers: HashMap::new(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    /// Sets how long an idle worker waits before exiting.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Queues a message for its sender's worker. Never waits on handling.
    pub fn dispatch(&mut self, message: IncomingMessage, outbox: Box<dyn Outbox>) {
        let user_id = message.user_id;
        let mut job = (message, outbox);

        if let Some(worker) = self.workers.get(&user_id) {
            match worker.tx.send(job) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    debug!("Worker for user {} exited; respawning", user_id);
                    job = returned;
                }
            }
        }

        let predecessor = self.workers.remove(&user_id).map(|worker| worker.task);
        self.workers.retain(|_, worker| !worker.task.is_finished());

        let worker = self.spawn_worker(user_id, predecessor);
        if worker.tx.send(job).is_err() {
            warn!("Fresh worker for user {} is gone; message dropped", user_id);
        }
        self.workers.insert(user_id, worker);
    }

    /// Number of live workers.
    #[must_use]
    pub fn active_workers(&self) -> usize {
        self.workers
            .values()
            .filter(|worker| !worker.tx.is_closed())
            .count()
    }

    fn spawn_worker(&self, user_id: i64, predecessor: Option<JoinHandle<()>>) -> Worker {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handler = Arc::clone(&self.handler);
        let idle_timeout = self.idle_timeout;

        let task = tokio::spawn(async move {
            if let Some(predecessor) = predecessor
                && let Err(e) = predecessor.await
            {
                warn!("Previous worker for user {} failed: {}", user_id, e);
            }
            debug!("Worker for user {} started", user_id);
            loop {
                match tokio::time::timeout(idle_timeout, rx.recv()).await {
                    Ok(Some((message, outbox))) => handler.handle(&message, outbox.as_ref()).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new work, then finish what is already queued.
                        rx.close();
                        while let Some((message, outbox)) = rx.recv().await {
                            handler.handle(&message, outbox.as_ref()).await;
                        }
                        break;
                    }
                }
            }
            debug!("Worker for user {} stopped", user_id);
        });

        Worker { tx, task }
    }
}

impl<C: AccountConnector> std::fmt::Debug for Dispatcher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers.len())
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::account::mock::{MockConnector, Script};
    use crate::conversation::ConversationService;
    use crate::storage::{CredentialStore, UsageLog};
    use crate::telegram::DeliveryError;
    use crate::telegram::recording::RecordingOutbox;

    /// Lets the test keep reading what a boxed outbox received.
    struct Shared(Arc<RecordingOutbox>);

    #[async_trait]
    impl Outbox for Shared {
        async fn send_text(&self, text: &str) -> Result<(), DeliveryError> {
            self.0.send_text(text).await
        }

        async fn send_document(
            &self,
            file_name: &str,
            contents: &[u8],
            caption: &str,
        ) -> Result<(), DeliveryError> {
            self.0.send_document(file_name, contents, caption).await
        }
    }

    async fn dispatcher(
        script: Script,
        dir: &tempfile::TempDir,
    ) -> Dispatcher<MockConnector> {
        let store = CredentialStore::open(dir.path().join("sessions")).unwrap();
        let usage = UsageLog::open(dir.path().join("analytics.db")).await.unwrap();
        let service = ConversationService::new(
            MockConnector::new(script),
            store.clone(),
            usage.clone(),
            3,
        );
        let handler = CommandHandler::new(Arc::new(service), store, usage, 0);
        Dispatcher::new(Arc::new(handler))
    }

    fn msg(user_id: i64, text: &str) -> IncomingMessage {
        IncomingMessage {
            user_id,
            first_name: "Ada".to_owned(),
            text: text.to_owned(),
        }
    }

    async fn wait_for(out: &RecordingOutbox, count: usize) {
        for _ in 0..200 {
            if out.sent().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {count} replies, got {:?}", out.sent());
    }

    #[tokio::test]
    async fn test_messages_of_one_user_are_handled_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = dispatcher(Script::default(), &dir).await;
        let out = Arc::new(RecordingOutbox::default());

        for text in ["/genstring", "123456", "abcHASH"] {
            dispatcher.dispatch(msg(1, text), Box::new(Shared(Arc::clone(&out))));
        }
        wait_for(&out, 3).await;

        let texts = out.texts();
        assert!(texts[0].contains("API_ID"));
        assert!(texts[1].contains("API_HASH"));
        assert!(texts[2].contains("phone number"));
        assert_eq!(dispatcher.active_workers(), 1);
    }

    #[tokio::test]
    async fn test_slow_user_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = dispatcher(
            Script {
                open_delay: Duration::from_millis(400),
                ..Script::default()
            },
            &dir,
        )
        .await;
        let slow = Arc::new(RecordingOutbox::default());
        let fast = Arc::new(RecordingOutbox::default());

        for text in ["/genstring", "1", "h", "+100"] {
            dispatcher.dispatch(msg(1, text), Box::new(Shared(Arc::clone(&slow))));
        }
        wait_for(&slow, 3).await;

        dispatcher.dispatch(msg(2, "/start"), Box::new(Shared(Arc::clone(&fast))));
        wait_for(&fast, 1).await;
        assert_eq!(slow.sent().len(), 3, "slow user's login should still be pending");

        wait_for(&slow, 4).await;
        assert!(slow.texts()[3].contains("login code"));
    }

    #[tokio::test]
    async fn test_idle_worker_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = dispatcher(Script::default(), &dir)
            .await
            .with_idle_timeout(Duration::from_millis(20));
        let out = Arc::new(RecordingOutbox::default());

        dispatcher.dispatch(msg(1, "/start"), Box::new(Shared(Arc::clone(&out))));
        wait_for(&out, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(dispatcher.active_workers(), 0);

        dispatcher.dispatch(msg(1, "/start"), Box::new(Shared(Arc::clone(&out))));
        wait_for(&out, 2).await;
    }

    #[tokio::test]
    async fn test_replacement_worker_waits_for_draining_predecessor() {
        let dir = tempfile::tempdir().unwrap();
        let mut dispatcher = dispatcher(Script::default(), &dir).await;
        let out = Arc::new(RecordingOutbox::default());

        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        drop(rx);
        let draining = {
            let out = Arc::clone(&out);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                out.send_text("queued earlier").await.unwrap();
            })
        };
        dispatcher.workers.insert(1, Worker { tx, task: draining });

        dispatcher.dispatch(msg(1, "/start"), Box::new(Shared(Arc::clone(&out))));
        wait_for(&out, 2).await;

        let texts = out.texts();
        assert_eq!(texts[0], "queued earlier");
        assert!(texts[1].starts_with("👋 Welcome"));
    }
}
