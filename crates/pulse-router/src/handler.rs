//! Handler trait for telemetry event types.

use async_trait::async_trait;

use pulse_core::{Result, TelemetryEvent};

/// Trait for event handlers.
///
/// Handlers own their collaborators (persistence sink, connection registry)
/// and must tolerate at-least-once delivery: a retried event may re-run any
/// side effect that completed before the failure.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The event type this handler processes.
    fn event_type(&self) -> &str;

    /// Handle one event. A returned error is classified via
    /// [`pulse_core::Error::is_retryable`] by whoever drives the retry.
    async fn handle(&self, event: &TelemetryEvent) -> Result<()>;
}

/// No-op handler for testing.
pub struct NoOpHandler {
    event_type: String,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given event type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
        }
    }
}

#[async_trait]
impl EventHandler for NoOpHandler {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn handle(&self, _event: &TelemetryEvent) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new("cell_executed");
        assert_eq!(handler.event_type(), "cell_executed");

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(handler.handle(&event).await.is_ok());
    }
}
