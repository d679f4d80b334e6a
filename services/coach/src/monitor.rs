//! Follows a session's published snapshots until it finishes.

use tokio::sync::watch;
use tracing::{debug, info, warn};
use voicecoach_core::{ErrorKind, SessionSnapshot, SessionState};

/// Logs transitions and periodic remaining time until the session reaches a
/// terminal state, then returns that final snapshot.
///
/// If the manager goes away first, the last snapshot seen is returned.
pub async fn follow_session(
    mut rx: watch::Receiver<SessionSnapshot>,
    report_every_secs: u64,
) -> SessionSnapshot {
    let mut last: Option<SessionSnapshot> = None;
    loop {
        let snapshot = rx.borrow_and_update().clone();
        log_change(last.as_ref(), &snapshot, report_every_secs);
        if snapshot.state.is_terminal() {
            return snapshot;
        }
        last = Some(snapshot);
        if rx.changed().await.is_err() {
            debug!("Session manager dropped; no further updates.");
            return rx.borrow().clone();
        }
    }
}

fn log_change(previous: Option<&SessionSnapshot>, current: &SessionSnapshot, every: u64) {
    let state_changed = previous.is_none_or(|p| p.state != current.state);
    if state_changed {
        match current.state {
            SessionState::Error(kind) => warn!(
                %kind,
                reason = current.error_message.as_deref().unwrap_or_default(),
                "Session failed."
            ),
            state => info!(
                %state,
                remaining_secs = current.remaining_secs(),
                "Session state changed."
            ),
        }
    }

    if current.state == SessionState::Connected {
        if previous.is_some_and(|p| p.ai_speaking != current.ai_speaking) {
            debug!(ai_speaking = current.ai_speaking, "Coach speaking state changed.");
        }
        let ticked = previous.is_some_and(|p| p.elapsed_secs != current.elapsed_secs);
        if ticked && every > 0 && current.elapsed_secs % every == 0 {
            info!(
                elapsed_secs = current.elapsed_secs,
                remaining_secs = current.remaining_secs(),
                "Session time."
            );
        }
    }
}

/// The text printed for a failed session, with a retry hint when retrying can help.
pub fn failure_report(kind: ErrorKind, message: &str) -> String {
    if kind.is_recoverable() {
        format!("{message}\nRun the command again to retry.")
    } else {
        message.to_string()
    }
}
