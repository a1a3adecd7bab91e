//! Error types for the sync engine.

use rowsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while driving a sync session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Local store error.
    #[error("local store error: {0}")]
    Store(String),

    /// Server rejected the exchange with a hard error.
    #[error("server error: {0}")]
    Server(String),

    /// Sync was cancelled cooperatively.
    #[error("sync cancelled")]
    Cancelled,

    /// A run was started while another run was still in progress.
    #[error("a sync run is already in progress on this session")]
    AlreadyRunning,

    /// Internal-consistency failure in the protocol core.
    ///
    /// Unlike every other variant this is a genuine fault: it propagates
    /// out of the run instead of being folded into statistics.
    #[error("internal consistency failure: {0}")]
    Internal(#[from] ProtocolError),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    ///
    /// Server rejections are not retryable: the server already saw the
    /// request and refused it, so resending the same payload cannot
    /// succeed. Transient failures belong in [`SyncError::Transport`]
    /// with the retryable flag set.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}
