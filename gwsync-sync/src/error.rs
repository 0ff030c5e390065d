//! Error types for gwsync-sync.

use thiserror::Error;

use gwsync_core::SessionId;

/// Failures reported by a [`crate::ports::Registry`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Transport failure: connection refused, DNS, timeout.
    #[error("registry unreachable: {0}")]
    Unreachable(String),

    /// The registry answered with an unexpected HTTP status.
    #[error("registry returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The session used for the call no longer exists.
    #[error("session {0} is not known to the registry")]
    SessionNotFound(SessionId),

    /// The response body could not be interpreted.
    #[error("unexpected registry response: {0}")]
    Decode(String),
}

impl RegistryError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }

    pub fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound(_))
    }
}

/// Failures reported by a [`crate::ports::SnapshotSource`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("routing source unreachable: {0}")]
    Unreachable(String),

    #[error("routing source returned HTTP {status}")]
    Status { status: u16 },

    #[error("routing source returned invalid rawdata: {0}")]
    Decode(String),
}
