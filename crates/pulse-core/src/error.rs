//! Error types for classpulse.

use thiserror::Error;

use crate::event::Priority;

/// Result type alias using classpulse's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for classpulse operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Structural problem with an event (missing subject, empty type).
    /// Dropped immediately, counted, never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A handler failed in a way that may succeed on retry (DB write,
    /// downstream network call).
    #[error("Handler error: {0}")]
    Handler(String),

    /// Bounded enqueue rejected a task.
    #[error("{priority} queue full (capacity {capacity})")]
    QueueFull { priority: Priority, capacity: usize },

    /// No connection registered under the given id.
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    /// Writing to a client transport failed; the client is disconnected.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failed handler attempt should be retried.
    ///
    /// Validation failures are structural and can never succeed on retry;
    /// everything else surfaced by a handler is treated as transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Validation(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = Error::Validation("missing subject_id".to_string());
        assert_eq!(err.to_string(), "Validation error: missing subject_id");
    }

    #[test]
    fn test_error_display_queue_full() {
        let err = Error::QueueFull {
            priority: Priority::High,
            capacity: 100,
        };
        assert_eq!(err.to_string(), "high queue full (capacity 100)");
    }

    #[test]
    fn test_error_display_client_not_found() {
        let err = Error::ClientNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Client not found: abc");
    }

    #[test]
    fn test_validation_is_not_retryable() {
        assert!(!Error::Validation("x".into()).is_retryable());
    }

    #[test]
    fn test_handler_and_transport_are_retryable() {
        assert!(Error::Handler("db down".into()).is_retryable());
        assert!(Error::Transport("pipe closed".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
