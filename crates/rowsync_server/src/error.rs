//! Error types for the server workflows.

use rowsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised by the server-side sync workflows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServerError {
    /// The change provider failed.
    #[error("provider error: {message}")]
    Provider {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The same primary key appeared twice in one request.
    ///
    /// Every key must fall into exactly one response group; a duplicate
    /// breaks that accounting and aborts the whole exchange.
    #[error("duplicate primary key in request: table `{table}`, key {key}")]
    DuplicateKey {
        /// Table of the duplicated row.
        table: String,
        /// Rendered primary key.
        key: String,
    },

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Internal-consistency failure in the protocol core.
    #[error("internal consistency failure: {0}")]
    Internal(#[from] ProtocolError),
}

impl ServerError {
    /// Creates a retryable provider error.
    pub fn provider_retryable(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable provider error.
    pub fn provider_fatal(message: impl Into<String>) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Provider { retryable: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServerError::provider_retryable("deadlock").is_retryable());
        assert!(!ServerError::provider_fatal("schema drift").is_retryable());
        assert!(!ServerError::InvalidRequest("bad cursor".into()).is_retryable());
        let dup = ServerError::DuplicateKey {
            table: "orders".into(),
            key: "[I64(1)]".into(),
        };
        assert!(!dup.is_retryable());
    }

    #[test]
    fn internal_wraps_protocol_error() {
        let err: ServerError = ProtocolError::EmptyRangeSet.into();
        assert!(matches!(err, ServerError::Internal(_)));
    }
}
