//! Periodic credential cleanup.
//!
//! Waits for the initial delay, then sweeps expired artifacts on every tick
//! until told to shut down. A failed sweep is logged and retried on the next
//! tick. Abandoned login flows are dropped on a separate, shorter timer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Instant, interval, interval_at};
use tracing::{debug, error, info, warn};

use crate::account::AccountConnector;
use crate::conversation::ConversationService;
use crate::storage::{CredentialStore, StoreError};

/// Longest gap between checks for abandoned flows.
const MAX_IDLE_CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Holder of conversations that can be abandoned mid-login.
#[async_trait]
pub trait IdleFlows: Send + Sync {
    /// Drops flows idle for at least `max_idle`; returns how many.
    async fn expire_idle(&self, max_idle: Duration) -> usize;
}

#[async_trait]
impl<C: AccountConnector> IdleFlows for ConversationService<C> {
    async fn expire_idle(&self, max_idle: Duration) -> usize {
        ConversationService::expire_idle(self, max_idle).await
    }
}

/// Messages that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerMessage {
    /// Run a sweep right away.
    SweepNow,
    /// Stop the scheduler.
    Shutdown,
}

/// Sweeps expired credential artifacts on an interval.
pub struct CleanupScheduler {
    /// Store being cleaned.
    store: CredentialStore,

    /// Artifacts at least this old are removed.
    max_age: Duration,

    /// Time between sweeps.
    every: Duration,

    /// Delay before the first sweep.
    first_delay: Duration,

    /// Conversations to expire, with their idle limit.
    idle_flows: Option<(Arc<dyn IdleFlows>, Duration)>,
}

impl CleanupScheduler {
    /// Creates a new cleanup scheduler.
    #[must_use]
    pub fn new(store: CredentialStore, max_age: Duration, every: Duration) -> Self {
        Self {
            store,
            max_age,
            every,
            first_delay: Duration::from_secs(10),
            idle_flows: None,
        }
    }

    /// Sets the delay before the first sweep.
    #[must_use]
    pub const fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    /// Also drops conversations that waited `max_idle` for input.
    #[must_use]
    pub fn with_idle_flows(mut self, flows: Arc<dyn IdleFlows>, max_idle: Duration) -> Self {
        self.idle_flows = Some((flows, max_idle));
        self
    }

    /// Runs the scheduler loop.
    pub async fn run(&self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            "Cleanup scheduler started (every {}s, max age {}s)",
            self.every.as_secs(),
            self.max_age.as_secs()
        );

        let mut timer = interval_at(Instant::now() + self.first_delay, self.every);
        let mut idle_timer = interval(self.idle_check_period());
        let reaping = self.idle_flows.is_some();

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick();
                }
                _ = idle_timer.tick(), if reaping => {
                    self.expire_idle().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::SweepNow) => {
                            debug!("Received sweep request");
                            self.tick();
                        }
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Cleanup scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    fn idle_check_period(&self) -> Duration {
        self.idle_flows
            .as_ref()
            .map_or(MAX_IDLE_CHECK_PERIOD, |(_, max_idle)| {
                (*max_idle).clamp(Duration::from_secs(1), MAX_IDLE_CHECK_PERIOD)
            })
    }

    /// Drops abandoned conversations; returns how many went.
    async fn expire_idle(&self) -> usize {
        let Some((flows, max_idle)) = &self.idle_flows else {
            return 0;
        };
        let expired = flows.expire_idle(*max_idle).await;
        if expired > 0 {
            info!("Dropped {} abandoned flow(s)", expired);
        }
        expired
    }

    /// Single sweep; returns how many artifacts were removed.
    fn tick(&self) -> usize {
        match self.store.sweep(self.max_age) {
            Ok(0) => {
                debug!("Cleanup found nothing to remove");
                0
            }
            Ok(removed) => {
                info!("Cleanup removed {} expired session(s)", removed);
                removed
            }
            Err(StoreError::SweepPartial { removed, failures }) => {
                warn!(
                    "Cleanup removed {} session(s), {} failure(s): {}",
                    removed,
                    failures.len(),
                    failures.join("; ")
                );
                removed
            }
            Err(e) => {
                error!("Session cleanup failed: {}", e);
                0
            }
        }
    }
}

impl std::fmt::Debug for CleanupScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupScheduler")
            .field("max_age", &self.max_age)
            .field("every", &self.every)
            .field("expires_idle_flows", &self.idle_flows.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::mock::{MockConnector, Script};
    use crate::storage::{CredentialArtifact, UsageLog};

    #[test]
    fn test_tick_removes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        store.put(&CredentialArtifact::new(1, "a".to_owned())).unwrap();

        let keep = CleanupScheduler::new(store.clone(), Duration::from_secs(3600), Duration::from_secs(60));
        assert_eq!(keep.tick(), 0);

        let purge = CleanupScheduler::new(store.clone(), Duration::ZERO, Duration::from_secs(60));
        assert_eq!(purge.tick(), 1);
        assert!(store.get(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_sweeps_on_request_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        store.put(&CredentialArtifact::new(1, "a".to_owned())).unwrap();

        let scheduler = CleanupScheduler::new(store.clone(), Duration::ZERO, Duration::from_secs(3600))
            .with_first_delay(Duration::from_secs(3600));
        let (tx, rx) = mpsc::channel(4);
        let task = tokio::spawn(async move { scheduler.run(rx).await });

        tx.send(SchedulerMessage::SweepNow).await.unwrap();
        tx.send(SchedulerMessage::Shutdown).await.unwrap();
        task.await.unwrap();

        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn test_tick_counts_removals_despite_failures() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        store.put(&CredentialArtifact::new(1, "a".to_owned())).unwrap();
        std::fs::create_dir(dir.path().join("2.json")).unwrap();
        std::fs::write(dir.path().join("2.json").join("x"), b"x").unwrap();

        let scheduler = CleanupScheduler::new(store.clone(), Duration::ZERO, Duration::from_secs(60));
        assert_eq!(scheduler.tick(), 1);
        assert!(store.get(1).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_idle_closes_abandoned_logins() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path().join("sessions")).unwrap();
        let usage = UsageLog::open(dir.path().join("analytics.db")).await.unwrap();
        let connector = MockConnector::new(Script::default());
        let service = Arc::new(ConversationService::new(
            connector.clone(),
            store.clone(),
            usage,
            3,
        ));

        service.start(1).await.unwrap();
        for text in ["123456", "abcHASH", "+15551234567"] {
            service.submit(1, text).await.unwrap();
        }

        let patient = CleanupScheduler::new(store.clone(), Duration::ZERO, Duration::from_secs(60))
            .with_idle_flows(service.clone(), Duration::from_secs(3600));
        assert_eq!(patient.expire_idle().await, 0);

        let strict = CleanupScheduler::new(store, Duration::ZERO, Duration::from_secs(60))
            .with_idle_flows(service.clone(), Duration::ZERO);
        assert_eq!(strict.expire_idle().await, 1);
        assert_eq!(connector.counters.closes(), 1);
        assert_eq!(service.state(1).await, None);
    }

    #[test]
    fn test_idle_check_period_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::open(dir.path()).unwrap();
        let scheduler = CleanupScheduler::new(store, Duration::ZERO, Duration::from_secs(60));
        assert_eq!(scheduler.idle_check_period(), MAX_IDLE_CHECK_PERIOD);
    }
}
