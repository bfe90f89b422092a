//! # pulse-pipeline
//!
//! Priority-queued parallel event processing.
//!
//! This crate provides:
//! - Three bounded FIFO queues consulted in strict priority order
//! - A growable pool of async workers pulling from the queues
//! - Per-task retry with exponential re-enqueue backoff
//! - A monitor loop that auto-scales the pool and flags stuck workers
//! - Process-lifetime processing statistics
//!
//! ## Example
//!
//! ```ignore
//! use pulse_pipeline::{EventProcessor, ProcessorBuilder, ProcessorConfig};
//!
//! let processor = ProcessorBuilder::new(router)
//!     .with_config(ProcessorConfig::from_env())
//!     .build();
//! processor.initialize().await;
//!
//! let task_id = processor.process_event(event)?;
//!
//! // Graceful shutdown with a drain grace period.
//! processor.shutdown().await;
//! ```

pub mod middleware;
pub mod processor;
pub mod queue;
pub mod stats;
pub mod task;
pub mod worker;

pub use middleware::{Middleware, RequestLoggingMiddleware};
pub use processor::{EventProcessor, ProcessorBuilder, ProcessorConfig};
pub use queue::{BoundedQueue, PriorityQueues, QueueDepths};
pub use stats::{ProcessingStats, StatsSnapshot};
pub use task::ProcessingTask;
pub use worker::{WorkerMetrics, WorkerStatus};
