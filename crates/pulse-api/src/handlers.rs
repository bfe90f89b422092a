//! Domain event handlers bridging the processing pipeline to the registry.
//!
//! Every handler persists the event first, then fans out the derived
//! notification. Persistence failures propagate so the worker retry ladder
//! can take over; fan-out delivery counts are logged, not errors — a room
//! with nobody listening is normal.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use pulse_core::{PersistenceSink, Result, TelemetryEvent};
use pulse_registry::{ClientType, ConnectionRegistry};
use pulse_router::EventHandler;

/// Room an event belongs to: its payload `class_id`, else `"default"`.
fn event_room(event: &TelemetryEvent) -> &str {
    event
        .payload
        .get("class_id")
        .and_then(JsonValue::as_str)
        .unwrap_or("default")
}

/// Handles execution-activity events (`cell_executed`, `code_completed`,
/// `error_occurred`): persists, then pushes a `student_progress_update` to
/// the event's room.
pub struct StudentActivityHandler {
    event_type: String,
    persistence: Arc<dyn PersistenceSink>,
    registry: Arc<ConnectionRegistry>,
}

impl StudentActivityHandler {
    pub fn new(
        event_type: impl Into<String>,
        persistence: Arc<dyn PersistenceSink>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            persistence,
            registry,
        }
    }
}

#[async_trait]
impl EventHandler for StudentActivityHandler {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn handle(&self, event: &TelemetryEvent) -> Result<()> {
        let subject = event.require_subject()?.to_string();
        self.persistence.persist(event).await?;

        let room = event_room(event);
        let message = json!({
            "type": "student_progress_update",
            "user_id": subject,
            "event_type": event.event_type,
            "payload": event.payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let delivered = self.registry.broadcast_to_room(room, &message).await;
        debug!(
            event_id = %event.event_id,
            room = %room,
            delivered,
            "student activity fanned out"
        );
        Ok(())
    }
}

/// Handles progress-tracking events (`progress_update`, `status_change`,
/// `notebook_saved`): persists, notifies the event's room, and pushes a
/// `dashboard_update` to dashboard clients.
pub struct ProgressHandler {
    event_type: String,
    persistence: Arc<dyn PersistenceSink>,
    registry: Arc<ConnectionRegistry>,
}

impl ProgressHandler {
    pub fn new(
        event_type: impl Into<String>,
        persistence: Arc<dyn PersistenceSink>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            persistence,
            registry,
        }
    }
}

#[async_trait]
impl EventHandler for ProgressHandler {
    fn event_type(&self) -> &str {
        &self.event_type
    }

    async fn handle(&self, event: &TelemetryEvent) -> Result<()> {
        let subject = event.require_subject()?.to_string();
        self.persistence.persist(event).await?;

        let room = event_room(event);
        let progress = json!({
            "type": "progress_update",
            "user_id": subject,
            "event_type": event.event_type,
            "payload": event.payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let to_room = self.registry.broadcast_to_room(room, &progress).await;

        let dashboard = json!({
            "type": "dashboard_update",
            "user_id": subject,
            "event_type": event.event_type,
            "payload": event.payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let to_dashboards = self
            .registry
            .broadcast_to_type(ClientType::Dashboard, &dashboard)
            .await;

        debug!(
            event_id = %event.event_id,
            room = %room,
            to_room,
            to_dashboards,
            "progress fanned out"
        );
        Ok(())
    }
}

/// Handles `help_requested` events: persists, then alerts instructors with a
/// `student_help_request`.
pub struct HelpRequestHandler {
    persistence: Arc<dyn PersistenceSink>,
    registry: Arc<ConnectionRegistry>,
}

impl HelpRequestHandler {
    pub fn new(persistence: Arc<dyn PersistenceSink>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            persistence,
            registry,
        }
    }
}

#[async_trait]
impl EventHandler for HelpRequestHandler {
    fn event_type(&self) -> &str {
        "help_requested"
    }

    async fn handle(&self, event: &TelemetryEvent) -> Result<()> {
        let subject = event.require_subject()?.to_string();
        self.persistence.persist(event).await?;

        let message = json!({
            "type": "student_help_request",
            "user_id": subject,
            "class_id": event.payload.get("class_id"),
            "payload": event.payload,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let delivered = self
            .registry
            .broadcast_to_type(ClientType::Instructor, &message)
            .await;
        debug!(
            event_id = %event.event_id,
            delivered,
            "help request fanned out to instructors"
        );
        Ok(())
    }
}
