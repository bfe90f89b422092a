//! Structured logging field name constants for classpulse.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Permanent task failure, requires operator attention |
//! | WARN  | Recoverable issue (queue full, retry scheduled, stuck worker) |
//! | INFO  | Lifecycle events (startup, shutdown, connect/disconnect) |
//! | DEBUG | Decision points, per-batch summaries |
//! | TRACE | Per-message fan-out detail |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Event UUID being processed.
pub const EVENT_ID: &str = "event_id";

/// Event type string.
pub const EVENT_TYPE: &str = "event_type";

/// Processing task UUID.
pub const TASK_ID: &str = "task_id";

/// Ingress batch UUID.
pub const BATCH_ID: &str = "batch_id";

/// Worker numeric id.
pub const WORKER_ID: &str = "worker_id";

/// Connection client id.
pub const CLIENT_ID: &str = "client_id";

/// Connection client type ("student", "instructor", ...).
pub const CLIENT_TYPE: &str = "client_type";

/// Room a connection or broadcast targets.
pub const ROOM: &str = "room";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Current retry count of a task.
pub const RETRIES: &str = "retries";

/// Queue depth at the time of logging.
pub const QUEUE_DEPTH: &str = "queue_depth";

/// Number of clients a broadcast was delivered to.
pub const DELIVERED: &str = "delivered";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
