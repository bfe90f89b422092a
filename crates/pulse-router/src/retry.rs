//! Retry decoration for event handlers.
//!
//! Retry is an explicit wrapper applied once at registration time, not
//! hidden control flow inside the router.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use pulse_core::{defaults, Result, TelemetryEvent};

use crate::handler::EventHandler;

/// Exponential-backoff retry policy: sleep `base^attempt` seconds between
/// attempts, up to `max_attempts` total attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts (first try included).
    pub max_attempts: u32,
    /// Backoff base in seconds.
    pub base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::ROUTER_MAX_ATTEMPTS,
            base_secs: defaults::ROUTER_BACKOFF_BASE_SECS,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following failed attempt `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_secs.saturating_pow(attempt))
    }
}

/// Retry decorator around a handler.
pub struct WithRetry {
    inner: Arc<dyn EventHandler>,
    policy: RetryPolicy,
}

impl WithRetry {
    pub fn new(inner: Arc<dyn EventHandler>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl EventHandler for WithRetry {
    fn event_type(&self) -> &str {
        self.inner.event_type()
    }

    async fn handle(&self, event: &TelemetryEvent) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.inner.handle(event).await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.policy.max_attempts {
                        return Err(e);
                    }
                    let delay = self.policy.delay(attempt - 1);
                    warn!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "handler failed, retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHandler {
        calls: AtomicU32,
        fail_times: u32,
    }

    impl FlakyHandler {
        fn new(fail_times: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_times,
            }
        }
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn event_type(&self) -> &str {
            "cell_executed"
        }

        async fn handle(&self, _event: &TelemetryEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err(Error::Handler("transient".into()))
            } else {
                Ok(())
            }
        }
    }

    struct RejectingHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl EventHandler for RejectingHandler {
        fn event_type(&self) -> &str {
            "cell_executed"
        }

        async fn handle(&self, _event: &TelemetryEvent) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Validation("missing subject_id".into()))
        }
    }

    fn event() -> TelemetryEvent {
        TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}))
    }

    #[test]
    fn test_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs(1));
        assert_eq!(policy.delay(1), Duration::from_secs(2));
        assert_eq!(policy.delay(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_within_attempts() {
        let inner = Arc::new(FlakyHandler::new(2));
        let wrapped = WithRetry::new(inner.clone(), RetryPolicy::default());

        assert!(wrapped.handle(&event()).await.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let inner = Arc::new(FlakyHandler::new(10));
        let wrapped = WithRetry::new(inner.clone(), RetryPolicy::default());

        assert!(wrapped.handle(&event()).await.is_err());
        // max_attempts total attempts, no more
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_not_retried() {
        let inner = Arc::new(RejectingHandler {
            calls: AtomicU32::new(0),
        });
        let wrapped = WithRetry::new(inner.clone(), RetryPolicy::default());

        let err = wrapped.handle(&event()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
