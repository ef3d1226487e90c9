//! Error types for the connection pool
use thiserror::Error;

use crate::connection::ConnectionId;

/// Boxed error produced by a driver (factory or connection).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`Pool`](crate::Pool) operations.
///
/// The pool never retries internally: every variant is handed straight back
/// to the caller, who owns the retry/backoff policy.
#[derive(Error, Debug)]
pub enum Error {
    /// Pool sizing is invalid. Raised by construction before any
    /// connection is opened.
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The factory could not establish a physical connection.
    #[error("Connection to '{target}' failed: {source}")]
    ConnectionFailed {
        /// Rendered `host:port/dbname` of the target (never credentials)
        target: String,
        /// The driver error
        #[source]
        source: BoxError,
    },

    /// The configured ceiling has been reached.
    #[error("Connection pool exhausted: {in_use} in use, {max_size} max")]
    PoolExhausted {
        /// Connections checked out at the time of the failure
        in_use: usize,
        /// Configured `max_size`
        max_size: usize,
    },

    /// A connection was released that this pool does not track.
    #[error("Invalid release of connection {connection}: not checked out from this pool")]
    InvalidRelease {
        /// Identity of the rejected handle
        connection: ConnectionId,
    },

    /// Pool bookkeeping is inconsistent.
    #[error("Internal pool error: {message}")]
    Internal {
        /// The error message
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection failure for `target`
    pub fn connection_failed<S: Into<String>>(target: S, source: BoxError) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            source,
        }
    }

    /// Create an internal consistency error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the caller may reasonably retry the operation later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::ConnectionFailed { .. }
        )
    }
}
