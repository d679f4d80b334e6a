//! Session state and the snapshot published to observers.

use crate::error::ErrorKind;
use std::fmt;
use uuid::Uuid;

/// The single source of truth for which operations are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Error(ErrorKind),
    Ended,
}

impl SessionState {
    /// Connecting or Connected: a resource set may be live.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Error(_) | SessionState::Ended)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Error(kind) => write!(f, "error ({kind})"),
            SessionState::Ended => f.write_str("ended"),
        }
    }
}

/// Everything a caller can observe about the session at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Incremented on every start, stop, and disposal. Work belonging to an
    /// older attempt compares against this and discards itself.
    pub attempt: u64,
    pub session_id: Option<Uuid>,
    pub state: SessionState,
    pub elapsed_secs: u64,
    pub budget_secs: u64,
    pub ai_speaking: bool,
    pub error_message: Option<String>,
}

impl SessionSnapshot {
    pub(crate) fn idle(budget_secs: u64) -> Self {
        Self {
            attempt: 0,
            session_id: None,
            state: SessionState::Idle,
            elapsed_secs: 0,
            budget_secs,
            ai_speaking: false,
            error_message: None,
        }
    }

    pub fn remaining_secs(&self) -> u64 {
        self.budget_secs.saturating_sub(self.elapsed_secs)
    }
}
