//! # pulse-router
//!
//! Maps event-type strings to handlers and decorates them with retry.
//!
//! This crate provides:
//! - The [`EventHandler`] trait implemented by domain handlers
//! - [`WithRetry`], an explicit retry decorator applied once at registration
//! - [`EventRouter`], the string-keyed registry with a default-handler
//!   fallback for unknown types
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use pulse_core::{LogErrorSink, LogPersistence};
//! use pulse_router::EventRouter;
//!
//! let router = EventRouter::new(Arc::new(LogPersistence), Arc::new(LogErrorSink));
//! router.register(Arc::new(MyHandler)).await;
//!
//! // Retry-wrapped entry point; never panics, reports permanent failures.
//! let ok = router.route(&event).await;
//!
//! // Single-attempt entry point for callers that own their retry ladder.
//! router.dispatch_once(&event).await?;
//! ```

pub mod handler;
pub mod retry;
pub mod router;

pub use handler::{EventHandler, NoOpHandler};
pub use retry::{RetryPolicy, WithRetry};
pub use router::EventRouter;
