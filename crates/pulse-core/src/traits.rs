//! Collaborator trait seams consumed by the pipeline.
//!
//! Real persistence (ORM, migrations) lives outside this core; handlers
//! receive these traits and the binary decides the concrete sinks.

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::event::TelemetryEvent;

/// Persistence collaborator: stores an accepted event.
///
/// Implementations must be safe to call concurrently from many workers.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    async fn persist(&self, event: &TelemetryEvent) -> Result<()>;
}

/// Error-reporting collaborator for permanently-failed tasks.
///
/// By the time this is called the HTTP response has long been sent, so the
/// sink is the only place these failures become visible.
#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn report(&self, event: &TelemetryEvent, error: &Error);
}

/// Persistence sink that writes a telemetry line via `tracing`.
///
/// This is the "minimal persistence + telemetry write" used by default
/// handling when no real store is wired in.
pub struct LogPersistence;

#[async_trait]
impl PersistenceSink for LogPersistence {
    async fn persist(&self, event: &TelemetryEvent) -> Result<()> {
        tracing::info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            subject_id = event.subject_id.as_deref().unwrap_or(""),
            "telemetry event persisted"
        );
        Ok(())
    }
}

/// Error sink that logs permanently-failed events.
pub struct LogErrorSink;

#[async_trait]
impl ErrorSink for LogErrorSink {
    async fn report(&self, event: &TelemetryEvent, error: &Error) {
        tracing::error!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            error = %error,
            "event permanently failed"
        );
    }
}

/// In-memory persistence sink for testing.
#[derive(Default)]
pub struct MemoryPersistence {
    events: std::sync::Mutex<Vec<TelemetryEvent>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events persisted so far.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of everything persisted so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl PersistenceSink for MemoryPersistence {
    async fn persist(&self, event: &TelemetryEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_log_persistence_ok() {
        let sink = LogPersistence;
        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({}));
        assert!(sink.persist(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_persistence_records() {
        let sink = MemoryPersistence::new();
        assert!(sink.is_empty());

        let event = TelemetryEvent::new("cell_executed", Some("u1".into()), json!({"cell": 3}));
        sink.persist(&event).await.unwrap();
        sink.persist(&event).await.unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events()[0].event_type, "cell_executed");
    }

    #[tokio::test]
    async fn test_log_error_sink_does_not_panic() {
        let sink = LogErrorSink;
        let event = TelemetryEvent::new("x", None, json!({}));
        sink.report(&event, &Error::Handler("boom".into())).await;
    }
}
