//! Telemetry event envelope and priority classification.
//!
//! Every payload entering the pipeline is wrapped in a [`TelemetryEvent`].
//! The envelope is created at ingress and immutable afterwards; a worker
//! consumes it and discards it. Priority is a total function of the
//! `event_type` string so that classification never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Telemetry event envelope.
///
/// `event_id` and `occurred_at` are filled in at ingress when the producer
/// omits them, so a minimal batch body only needs `event_type` and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Unique event identifier.
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    /// Event type string, e.g. `"cell_executed"`. Must be non-empty.
    pub event_type: String,
    /// When the event occurred (UTC).
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    /// The user/session this event belongs to. Required by default handling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Domain-specific event data.
    #[serde(default)]
    pub payload: JsonValue,
}

impl TelemetryEvent {
    /// Create an event with a fresh id and the current timestamp.
    pub fn new(
        event_type: impl Into<String>,
        subject_id: Option<String>,
        payload: JsonValue,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            occurred_at: Utc::now(),
            subject_id,
            payload,
        }
    }

    /// Structural validation applied before enqueue.
    ///
    /// Only `event_type` is checked here; `subject_id` requirements are
    /// handler policy (the default handler rejects events without one).
    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(Error::Validation("event_type must be non-empty".into()));
        }
        Ok(())
    }

    /// The subject id, or a validation error for handlers that require it.
    pub fn require_subject(&self) -> Result<&str> {
        self.subject_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "event {} ({}) is missing subject_id",
                    self.event_id, self.event_type
                ))
            })
    }
}

/// Processing priority tier.
///
/// The three tiers map onto three independent bounded FIFO queues consulted
/// in strict descending order; this is deliberately not a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// All tiers in descending scheduling order.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Classify an event type into a priority tier.
    ///
    /// Total function: unknown types are Low.
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            "cell_executed" | "code_completed" | "error_occurred" => Priority::High,
            "progress_update" | "status_change" | "notebook_saved" => Priority::Medium,
            _ => Priority::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
