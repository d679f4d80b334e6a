//! Error taxonomy for session setup and teardown.
//!
//! Collaborators report failures as [`SessionError`], already classified. The
//! connection manager never surfaces a raw transport error; it only records
//! the [`ErrorKind`] in the session state together with a readable message.

use crate::state::SessionState;
use std::fmt;

/// Fieldless classification carried by `SessionState::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    PermissionDenied,
    CapabilityUnavailable,
    NegotiationFailed,
    TransportFailed,
    Unknown,
}

impl ErrorKind {
    /// Whether starting again may succeed without changing the build or host.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ErrorKind::CapabilityUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::CapabilityUnavailable => "capability unavailable",
            ErrorKind::NegotiationFailed => "negotiation failed",
            ErrorKind::TransportFailed => "transport failed",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A classified failure from any step of establishing a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Microphone access was denied")]
    PermissionDenied,
    #[error("Voice transport is not available on this host: {0}")]
    CapabilityUnavailable(String),
    #[error("Session negotiation failed: {0}")]
    NegotiationFailed(String),
    #[error("Transport error: {0}")]
    TransportFailed(String),
    #[error("Unexpected error: {0}")]
    Unknown(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::PermissionDenied => ErrorKind::PermissionDenied,
            SessionError::CapabilityUnavailable(_) => ErrorKind::CapabilityUnavailable,
            SessionError::NegotiationFailed(_) => ErrorKind::NegotiationFailed,
            SessionError::TransportFailed(_) => ErrorKind::TransportFailed,
            SessionError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether retrying `start` can succeed without changing the runtime.
    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }

    /// The message shown to the user for this failure.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::CapabilityUnavailable(detail) => format!(
                "Voice sessions need native audio transport support, which this build does not \
                 include ({detail}). Install a build with voice support to continue."
            ),
            other => other.to_string(),
        }
    }
}

/// Why a call to `start` did not end in `Connected`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    /// A session is already connecting or connected; nothing was acquired.
    #[error("A session is already {0}")]
    Rejected(SessionState),
    /// The attempt was stopped or disposed while in flight and its result discarded.
    #[error("The session attempt was cancelled")]
    Cancelled,
    #[error(transparent)]
    Failed(#[from] SessionError),
}

impl StartError {
    /// The underlying classified failure, if the attempt actually failed.
    pub fn session_error(&self) -> Option<&SessionError> {
        match self {
            StartError::Failed(e) => Some(e),
            _ => None,
        }
    }
}
