//! Pre/post hooks around task dispatch.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use pulse_core::{Error, TelemetryEvent};

/// Hook invoked around every dispatch attempt.
///
/// `before` runs just before the handler, `after` just after, with the
/// attempt outcome and wall-clock duration. Hooks must not fail; anything
/// they need to surface goes through logging.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn before(&self, event: &TelemetryEvent);
    async fn after(&self, event: &TelemetryEvent, outcome: &Result<(), Error>, elapsed: Duration);
}

/// Logs each dispatch attempt with its outcome and duration.
pub struct RequestLoggingMiddleware;

#[async_trait]
impl Middleware for RequestLoggingMiddleware {
    async fn before(&self, event: &TelemetryEvent) {
        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "dispatching event"
        );
    }

    async fn after(&self, event: &TelemetryEvent, outcome: &Result<(), Error>, elapsed: Duration) {
        match outcome {
            Ok(()) => info!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                duration_ms = elapsed.as_millis() as u64,
                "event dispatched"
            ),
            Err(e) => warn!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "event dispatch failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct CountingMiddleware {
        before: AtomicU32,
        after: AtomicU32,
    }

    #[async_trait]
    impl Middleware for CountingMiddleware {
        async fn before(&self, _event: &TelemetryEvent) {
            self.before.fetch_add(1, Ordering::SeqCst);
        }

        async fn after(
            &self,
            _event: &TelemetryEvent,
            _outcome: &Result<(), Error>,
            _elapsed: Duration,
        ) {
            self.after.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_hooks_fire_in_order() {
        let mw = Arc::new(CountingMiddleware {
            before: AtomicU32::new(0),
            after: AtomicU32::new(0),
        });
        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));

        mw.before(&event).await;
        assert_eq!(mw.before.load(Ordering::SeqCst), 1);
        assert_eq!(mw.after.load(Ordering::SeqCst), 0);

        mw.after(&event, &Ok(()), Duration::from_millis(5)).await;
        assert_eq!(mw.after.load(Ordering::SeqCst), 1);
    }
}
