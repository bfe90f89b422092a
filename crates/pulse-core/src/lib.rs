//! # pulse-core
//!
//! Core types, errors, and collaborator traits for classpulse.
//!
//! This crate provides the telemetry event envelope, the priority
//! classification used by the processing pipeline, the shared error type,
//! and the trait seams (persistence, error reporting) that the pipeline
//! consumes but does not implement.

pub mod defaults;
pub mod error;
pub mod event;
pub mod logging;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use event::{Priority, TelemetryEvent};
pub use traits::{ErrorSink, LogErrorSink, LogPersistence, MemoryPersistence, PersistenceSink};
