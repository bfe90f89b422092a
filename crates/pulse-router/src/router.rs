//! String-keyed event routing with default-handler fallback.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, warn};

use pulse_core::{Error, ErrorSink, PersistenceSink, Result, TelemetryEvent};

use crate::handler::EventHandler;
use crate::retry::{RetryPolicy, WithRetry};

/// A registered handler kept in both raw and retry-wrapped form.
///
/// `route()` uses the wrapped form; `dispatch_once()` uses the raw form so
/// the worker pool's re-enqueue ladder never stacks on the in-process one.
struct Registered {
    raw: Arc<dyn EventHandler>,
    retried: Arc<WithRetry>,
}

/// Event router mapping `event_type` strings to handlers.
///
/// Read-mostly after startup: registrations happen during wiring, lookups on
/// every processed event.
pub struct EventRouter {
    handlers: RwLock<HashMap<String, Registered>>,
    default_handler: Registered,
    error_sink: Arc<dyn ErrorSink>,
    policy: RetryPolicy,
}

impl EventRouter {
    /// Create a router with the default retry policy.
    pub fn new(persistence: Arc<dyn PersistenceSink>, error_sink: Arc<dyn ErrorSink>) -> Self {
        Self::with_policy(persistence, error_sink, RetryPolicy::default())
    }

    /// Create a router with an explicit retry policy.
    pub fn with_policy(
        persistence: Arc<dyn PersistenceSink>,
        error_sink: Arc<dyn ErrorSink>,
        policy: RetryPolicy,
    ) -> Self {
        let default_raw: Arc<dyn EventHandler> = Arc::new(DefaultHandler { persistence });
        let default_handler = Registered {
            raw: default_raw.clone(),
            retried: Arc::new(WithRetry::new(default_raw, policy.clone())),
        };
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_handler,
            error_sink,
            policy,
        }
    }

    /// Register a handler for its event type.
    ///
    /// The last registration for a given type wins; re-registering is not an
    /// error. The retry decorator is applied here, once.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let event_type = handler.event_type().to_string();
        let registered = Registered {
            raw: handler.clone(),
            retried: Arc::new(WithRetry::new(handler, self.policy.clone())),
        };
        let replaced = self
            .handlers
            .write()
            .await
            .insert(event_type.clone(), registered);
        debug!(
            event_type = %event_type,
            replaced = replaced.is_some(),
            "registered event handler"
        );
    }

    /// Whether a handler is registered for the given type.
    pub async fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.read().await.contains_key(event_type)
    }

    /// Number of registered handlers (default excluded).
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }

    /// Route an event through its retry-wrapped handler.
    ///
    /// Unknown types fall back to the default handler. Never panics and
    /// never propagates: a permanently-failed event is reported to the
    /// error sink and `false` is returned.
    pub async fn route(&self, event: &TelemetryEvent) -> bool {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&event.event_type)
                .map(|r| r.retried.clone())
                .unwrap_or_else(|| self.default_handler.retried.clone())
        };

        match handler.handle(event).await {
            Ok(()) => true,
            Err(e) if !e.is_retryable() => {
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "event rejected, not retried"
                );
                false
            }
            Err(e) => {
                error!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "handler exhausted retries"
                );
                self.error_sink.report(event, &e).await;
                false
            }
        }
    }

    /// Report a permanently failed event to the error sink.
    ///
    /// `route()` does this itself; callers of `dispatch_once()` own their
    /// retry ladder and call this once that ladder is exhausted.
    pub async fn report_failure(&self, event: &TelemetryEvent, error: &Error) {
        self.error_sink.report(event, error).await;
    }

    /// Single-attempt dispatch with default-handler fallback.
    ///
    /// This is the path the worker pool calls; it owns its own retry ladder
    /// via re-enqueue, so no backoff happens here.
    pub async fn dispatch_once(&self, event: &TelemetryEvent) -> Result<()> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&event.event_type)
                .map(|r| r.raw.clone())
                .unwrap_or_else(|| self.default_handler.raw.clone())
        };
        handler.handle(event).await
    }
}

/// Fallback for event types with no registered handler: minimal persistence
/// plus a telemetry write. Requires `subject_id`.
struct DefaultHandler {
    persistence: Arc<dyn PersistenceSink>,
}

#[async_trait]
impl EventHandler for DefaultHandler {
    fn event_type(&self) -> &str {
        "_default"
    }

    async fn handle(&self, event: &TelemetryEvent) -> Result<()> {
        event.require_subject()?;
        self.persistence.persist(event).await?;
        debug!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            "event handled by default path"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{Error, LogErrorSink, MemoryPersistence};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        event_type: String,
        calls: AtomicU32,
        fail_times: u32,
    }

    impl CountingHandler {
        fn new(event_type: &str, fail_times: u32) -> Self {
            Self {
                event_type: event_type.to_string(),
                calls: AtomicU32::new(0),
                fail_times,
            }
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn event_type(&self) -> &str {
            &self.event_type
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

    struct CountingErrorSink {
        reports: AtomicU32,
    }

    #[async_trait]
    impl ErrorSink for CountingErrorSink {
        async fn report(&self, _event: &TelemetryEvent, _error: &Error) {
            self.reports.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn router_with(persistence: Arc<MemoryPersistence>) -> EventRouter {
        EventRouter::new(persistence, Arc::new(LogErrorSink))
    }

    #[tokio::test]
    async fn test_register_last_wins() {
        let router = router_with(Arc::new(MemoryPersistence::new()));
        let first = Arc::new(CountingHandler::new("cell_executed", u32::MAX));
        let second = Arc::new(CountingHandler::new("cell_executed", 0));
        router.register(first.clone()).await;
        router.register(second.clone()).await;
        assert_eq!(router.handler_count().await, 1);

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(router.route(&event).await);
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_handler_invoked_exactly_once() {
        let persistence = Arc::new(MemoryPersistence::new());
        let router = router_with(persistence.clone());

        let event = TelemetryEvent::new("unknown_type", Some("u1".into()), json!({}));
        assert!(router.route(&event).await);
        assert_eq!(persistence.len(), 1);
    }

    #[tokio::test]
    async fn test_default_handler_rejects_missing_subject() {
        let persistence = Arc::new(MemoryPersistence::new());
        let router = router_with(persistence.clone());

        let event = TelemetryEvent::new("unknown_type", None, json!({}));
        assert!(!router.route(&event).await);
        assert!(persistence.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_retries_then_succeeds() {
        let router = router_with(Arc::new(MemoryPersistence::new()));
        let handler = Arc::new(CountingHandler::new("cell_executed", 2));
        router.register(handler.clone()).await;

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(router.route(&event).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_permanent_failure_reports_sink() {
        let sink = Arc::new(CountingErrorSink {
            reports: AtomicU32::new(0),
        });
        let router = EventRouter::new(Arc::new(MemoryPersistence::new()), sink.clone());
        router
            .register(Arc::new(CountingHandler::new("cell_executed", u32::MAX)))
            .await;

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(!router.route(&event).await);
        assert_eq!(sink.reports.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_once_is_single_attempt() {
        let router = router_with(Arc::new(MemoryPersistence::new()));
        let handler = Arc::new(CountingHandler::new("cell_executed", u32::MAX));
        router.register(handler.clone()).await;

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(router.dispatch_once(&event).await.is_err());
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_once_falls_back_to_default() {
        let persistence = Arc::new(MemoryPersistence::new());
        let router = router_with(persistence.clone());

        let event = TelemetryEvent::new("mystery", Some("u1".into()), json!({}));
        assert!(router.dispatch_once(&event).await.is_ok());
        assert_eq!(persistence.len(), 1);
    }
}
