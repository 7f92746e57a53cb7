//! Scripted account connector for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{AccountConnector, AccountError, AccountHandle, SubmitOutcome};

/// What the fake remote does at each step.
#[derive(Debug, Clone)]
pub(crate) struct Script {
    pub open: Result<(), AccountError>,
    pub request_code: Result<(), AccountError>,
    pub submit_code: Result<SubmitOutcome, AccountError>,
    pub second_factor: Result<(), AccountError>,
    pub export: Result<String, AccountError>,
    /// Artificial latency of `open`, to observe concurrency and timeouts.
    pub open_delay: Duration,
    /// Artificial latency of every call made on an open handle.
    pub call_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            open: Ok(()),
            request_code: Ok(()),
            submit_code: Ok(SubmitOutcome::Authenticated),
            second_factor: Ok(()),
            export: Ok("exported-session".to_owned()),
            open_delay: Duration::ZERO,
            call_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub opens: AtomicUsize,
    /// Connections actually torn down.
    pub closes: AtomicUsize,
    /// Every `close` call, including repeats on a closed handle.
    pub close_calls: AtomicUsize,
    pub code_requests: AtomicUsize,
    pub code_submits: AtomicUsize,
    pub second_factor_submits: AtomicUsize,
}

impl Counters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn code_requests(&self) -> usize {
        self.code_requests.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MockConnector {
    script: Arc<Mutex<Script>>,
    pub counters: Arc<Counters>,
}

impl MockConnector {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(Mutex::new(script)),
            counters: Arc::default(),
        }
    }
}

#[async_trait]
impl AccountConnector for MockConnector {
    type Handle = MockHandle;

    async fn open(
        &self,
        _api_id: i32,
        _api_hash: &str,
        _user_id: i64,
    ) -> Result<MockHandle, AccountError> {
        let script = self.script.lock().await.clone();
        if !script.open_delay.is_zero() {
            tokio::time::sleep(script.open_delay).await;
        }
        script.open.clone()?;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            script,
            counters: Arc::clone(&self.counters),
            closed: false,
        })
    }
}

/// Behaves like the real adapter: a failed call disconnects before
/// returning its error, and `close` only tears down once.
#[derive(Debug)]
pub(crate) struct MockHandle {
    script: Script,
    counters: Arc<Counters>,
    closed: bool,
}

impl MockHandle {
    async fn reply<T>(&mut self, scripted: Result<T, AccountError>) -> Result<T, AccountError> {
        if !self.script.call_delay.is_zero() {
            tokio::time::sleep(self.script.call_delay).await;
        }
        if scripted.is_err() {
            self.close().await;
        }
        scripted
    }
}

#[async_trait]
impl AccountHandle for MockHandle {
    type Ticket = String;

    async fn request_code(&mut self, _phone: &str) -> Result<String, AccountError> {
        self.counters.code_requests.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.request_code.clone().map(|()| "code-hash".to_owned());
        self.reply(scripted).await
    }

    async fn submit_code(
        &mut self,
        ticket: &String,
        _code: &str,
    ) -> Result<SubmitOutcome, AccountError> {
        assert_eq!(ticket, "code-hash");
        self.counters.code_submits.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.submit_code.clone();
        self.reply(scripted).await
    }

    async fn submit_second_factor(&mut self, _secret: &str) -> Result<(), AccountError> {
        self.counters
            .second_factor_submits
            .fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.second_factor.clone();
        self.reply(scripted).await
    }

    async fn export_session_string(&mut self) -> Result<String, AccountError> {
        let scripted = self.script.export.clone();
        self.reply(scripted).await
    }

    async fn close(&mut self) {
        self.counters.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return;
        }
        self.closed = true;
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_twice_disconnects_once() {
        let connector = MockConnector::new(Script::default());
        let mut handle = connector.open(1, "hash", 7).await.unwrap();

        handle.close().await;
        handle.close().await;

        assert_eq!(connector.counters.closes(), 1);
        assert_eq!(connector.counters.close_calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_call_disconnects_before_returning() {
        let connector = MockConnector::new(Script {
            request_code: Err(AccountError::Transport("reset".to_owned())),
            ..Script::default()
        });
        let mut handle = connector.open(1, "hash", 7).await.unwrap();

        assert!(handle.request_code("+100").await.is_err());
        assert_eq!(connector.counters.closes(), 1);

        handle.close().await;
        assert_eq!(connector.counters.closes(), 1);
    }
}
