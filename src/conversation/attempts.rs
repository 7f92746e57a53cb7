//! Per-user attempt counter for `/genstring`.
//!
//! Counts are only ever incremented. They live for the lifetime of the
//! process and reset on restart.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Caps how many flows a user may start.
#[derive(Debug)]
pub struct AttemptCounter {
    /// Maximum allowed attempts per user.
    max_attempts: u32,

    /// Attempts made so far, keyed by user id.
    attempts: Mutex<HashMap<i64, u32>>,
}

impl AttemptCounter {
    /// Creates a counter allowing `max_attempts` starts per user.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Consumes one attempt if any are left.
    ///
    /// Returns the attempt number just taken (1-based), or `None` when the
    /// user has exhausted the quota. A refused call changes nothing.
    pub async fn try_acquire(&self, user_id: i64) -> Option<u32> {
        let mut attempts = self.attempts.lock().await;
        let used = attempts.get(&user_id).copied().unwrap_or(0);

        if used >= self.max_attempts {
            warn!("User {} exceeded {} attempts", user_id, self.max_attempts);
            return None;
        }

        let taken = used + 1;
        attempts.insert(user_id, taken);
        debug!("User {} attempt {}/{}", user_id, taken, self.max_attempts);
        Some(taken)
    }

    /// Attempts used by `user_id` so far.
    pub async fn used(&self, user_id: i64) -> u32 {
        self.attempts
            .lock()
            .await
            .get(&user_id)
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_attempt() {
        let counter = AttemptCounter::new(3);
        assert_eq!(counter.used(1).await, 0);
        assert_eq!(counter.try_acquire(1).await, Some(1));
        assert_eq!(counter.used(1).await, 1);
    }

    #[tokio::test]
    async fn test_cap_is_enforced() {
        let counter = AttemptCounter::new(3);
        for expected in 1..=3 {
            assert_eq!(counter.try_acquire(7).await, Some(expected));
        }
        assert_eq!(counter.try_acquire(7).await, None);
        assert_eq!(counter.try_acquire(7).await, None);
        assert_eq!(counter.used(7).await, 3);
    }

    #[tokio::test]
    async fn test_users_are_independent() {
        let counter = AttemptCounter::new(1);
        assert_eq!(counter.try_acquire(1).await, Some(1));
        assert_eq!(counter.try_acquire(1).await, None);
        assert_eq!(counter.try_acquire(2).await, Some(1));
    }
}
