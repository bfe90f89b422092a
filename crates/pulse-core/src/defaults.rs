//! Centralized default constants for the classpulse system.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs (`ProcessorConfig`, `RegistryConfig`, the API binary)
//! reference these constants instead of defining their own magic numbers.

// =============================================================================
// INGRESS
// =============================================================================

/// Maximum events accepted per batch; larger batches get HTTP 413.
pub const MAX_BATCH_SIZE: usize = 200;

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 8080;

// =============================================================================
// QUEUES
// =============================================================================

/// Bounded capacity of the high-priority queue.
pub const QUEUE_CAPACITY_HIGH: usize = 100;

/// Bounded capacity of the medium-priority queue.
pub const QUEUE_CAPACITY_MEDIUM: usize = 200;

/// Bounded capacity of the low-priority queue.
pub const QUEUE_CAPACITY_LOW: usize = 500;

// =============================================================================
// WORKER POOL
// =============================================================================

/// Workers started by `initialize()` (clamped to `MAX_WORKERS`).
pub const INITIAL_WORKERS: usize = 4;

/// Upper bound the auto-scaler will grow the pool to.
pub const MAX_WORKERS: usize = 8;

/// Sleep between polls when all three queues are empty (milliseconds).
pub const WORKER_IDLE_POLL_MS: u64 = 100;

/// Monitor loop tick interval (milliseconds).
pub const MONITOR_INTERVAL_MS: u64 = 5_000;

/// High-queue depth that triggers spawning one extra worker.
pub const SCALE_UP_HIGH_DEPTH: usize = 20;

/// A Processing worker idle longer than this is flagged as stuck (seconds).
pub const STUCK_WORKER_SECS: i64 = 60;

/// Grace period for queue drain during shutdown (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

// =============================================================================
// RETRY
// =============================================================================

/// Maximum re-enqueue retries per task in the worker pool.
pub const TASK_MAX_RETRIES: u32 = 3;

/// Worker re-enqueue backoff base: `500ms * 2^retries`.
pub const REENQUEUE_BACKOFF_BASE_MS: u64 = 500;

/// Total attempts made by the router's retry decorator.
pub const ROUTER_MAX_ATTEMPTS: u32 = 3;

/// Router backoff base: sleep `base^attempt` seconds between attempts.
pub const ROUTER_BACKOFF_BASE_SECS: u64 = 2;

// =============================================================================
// CONNECTIONS
// =============================================================================

/// Connections idle longer than this are removed by the cleanup sweep.
pub const STALE_CONNECTION_TIMEOUT_MINS: u64 = 30;

/// Per-connection outbound message buffer (messages).
pub const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Registry listener event channel capacity.
pub const REGISTRY_EVENT_CAPACITY: usize = 256;

/// WebSocket keepalive ping interval (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// System stats fan-out interval for dashboards (seconds).
pub const SYSTEM_STATS_INTERVAL_SECS: u64 = 5;

/// Stale-connection cleanup sweep interval (seconds).
pub const STALE_SWEEP_INTERVAL_SECS: u64 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_capacities_ordered() {
        const {
            assert!(QUEUE_CAPACITY_HIGH < QUEUE_CAPACITY_MEDIUM);
            assert!(QUEUE_CAPACITY_MEDIUM < QUEUE_CAPACITY_LOW);
        }
    }

    #[test]
    fn initial_workers_within_max() {
        const {
            assert!(INITIAL_WORKERS <= MAX_WORKERS);
        }
    }

    #[test]
    fn scale_trigger_below_high_capacity() {
        const {
            assert!(SCALE_UP_HIGH_DEPTH < QUEUE_CAPACITY_HIGH);
        }
    }
}
