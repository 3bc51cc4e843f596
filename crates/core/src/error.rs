//! Error types for livesql.

use std::time::Duration;

/// Result type alias for livesql operations.
pub type Result<T> = std::result::Result<T, Error>;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for livesql operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The query definition combines options that exclude each other.
    #[error("Invalid definition: {message}")]
    Definition { message: String },

    /// The operation is not valid in the subscription's current state.
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// The backing store failed to execute a statement.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// A statement or wait exceeded its configured bound.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The diff output contradicts itself. Never retried.
    #[error("Integrity violation: {message}")]
    Integrity { message: String },

    /// A payload or row could not be decoded.
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// The relation does not exist.
    #[error("Relation not found: {name}")]
    RelationNotFound { name: String },

    /// The engine has been shut down.
    #[error("Engine is shut down")]
    Shutdown,
}

impl Error {
    /// Creates a definition error.
    pub fn definition(message: impl Into<String>) -> Self {
        Error::Definition {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a database error without an underlying source.
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a database error wrapping the driver's error.
    pub fn database_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Error::Integrity {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    /// Creates a relation not found error.
    pub fn relation_not_found(name: impl Into<String>) -> Self {
        Error::RelationNotFound { name: name.into() }
    }

    /// Returns true for failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Database { .. } | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::decode(e.to_string())
    }
}
