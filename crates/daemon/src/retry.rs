//! Bounded polling shared by the segment handoff.

use crate::config::HandoffConfig;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How many times to check and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Effective attempt count; a policy always checks at least once.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `check` until it returns true or attempts are exhausted.
    ///
    /// Sleeps `interval` between attempts, never after the last one.
    pub async fn poll_until<F, Fut>(&self, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            if check().await {
                return true;
            }
            if attempt < attempts {
                sleep(self.interval).await;
            }
        }
        false
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&HandoffConfig::default())
    }
}

impl From<&HandoffConfig> for RetryPolicy {
    fn from(config: &HandoffConfig) -> Self {
        Self::new(config.max_attempts, config.poll_interval())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_default_matches_handoff_config() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 6);
        assert_eq!(policy.interval, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_poll_until_stops_at_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let ok = fast(5)
            .poll_until(|| {
                let c = c.clone();
                async move { c.fetch_add(1, Ordering::SeqCst) + 1 >= 3 }
            })
            .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_until_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let ok = fast(4)
            .poll_until(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    false
                }
            })
            .await;
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_checks_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        fast(0)
            .poll_until(|| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    false
                }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
