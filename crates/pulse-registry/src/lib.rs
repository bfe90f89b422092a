//! # pulse-registry
//!
//! WebSocket connection bookkeeping and filtered fan-out.
//!
//! This crate provides:
//! - A typed connection record with a bounded outbound channel
//! - Room and client-type indices with snapshot-based broadcast
//! - Per-client-type message filtering
//! - Stale connection cleanup and lifecycle events
//!
//! ## Example
//!
//! ```ignore
//! use pulse_registry::{ClientType, ConnectOptions, ConnectionRegistry};
//!
//! let registry = ConnectionRegistry::default();
//! let client_id = registry
//!     .connect(ClientType::Student, tx, ConnectOptions::new().with_subject_id("u1"))
//!     .await;
//!
//! registry.broadcast_to_room("cs101", &message).await;
//! registry.disconnect(&client_id).await;
//! ```

pub mod connection;
pub mod filter;
pub mod registry;

pub use connection::{ClientType, Connection};
pub use filter::MessageFilter;
pub use registry::{
    ConnectOptions, ConnectionRegistry, RegistryConfig, RegistryEvent, RegistryStats,
};
