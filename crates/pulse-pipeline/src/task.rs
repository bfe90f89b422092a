//! Processing task wrapper around a telemetry event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use pulse_core::{defaults, Priority, TelemetryEvent};

/// A unit of work owned by exactly one queue or worker at a time.
///
/// Created on enqueue, destroyed on success or when `retries` exceeds
/// `max_retries`. `timeout_hint` is advisory metadata: nothing in this core
/// preempts a long-running handler.
#[derive(Debug, Clone)]
pub struct ProcessingTask {
    pub task_id: Uuid,
    pub event: TelemetryEvent,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    /// Failed attempts so far; incremented by the worker on each failure.
    pub retries: u32,
    pub max_retries: u32,
    /// Advisory per-task timeout. Not enforced.
    pub timeout_hint: Option<Duration>,
}

impl ProcessingTask {
    /// Wrap an event for processing at the given priority.
    pub fn new(event: TelemetryEvent, priority: Priority) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            event,
            priority,
            created_at: Utc::now(),
            retries: 0,
            max_retries: defaults::TASK_MAX_RETRIES,
            timeout_hint: None,
        }
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Attach an advisory timeout hint.
    pub fn with_timeout_hint(mut self, hint: Duration) -> Self {
        self.timeout_hint = Some(hint);
        self
    }

    /// Whether another retry is allowed after the current failure count.
    pub fn can_retry(&self) -> bool {
        self.retries <= self.max_retries
    }

    /// Backoff before re-enqueueing this task: `500ms * 2^retries`.
    pub fn reenqueue_delay(&self) -> Duration {
        Duration::from_millis(
            defaults::REENQUEUE_BACKOFF_BASE_MS.saturating_mul(1u64 << self.retries.min(16)),
        )
    }
}
