//! Inputs to a session attempt.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;

/// Default hard limit on a connected session.
pub const SESSION_BUDGET: Duration = Duration::from_secs(600);

/// Default model targeted by the signaling exchange.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Immutable input to `ConnectionManager::start`, supplied once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    /// Which coach persona the backend should configure.
    pub coach_id: String,
    /// BCP-47 language tag for the conversation (e.g. "en-US").
    pub locale: String,
    /// Optional free-form context handed to the coach.
    pub context: Option<String>,
}

impl SessionParams {
    pub fn new(coach_id: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            coach_id: coach_id.into(),
            locale: locale.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// A short-lived, single-use secret authorizing one signaling exchange.
///
/// The secret is never logged: `Debug` is redacted and the value can only be
/// read through [`Credential::expose`].
#[derive(Debug)]
pub struct Credential {
    secret: SecretString,
    expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(secret.into()),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Fixed settings for every attempt made by one manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Remote model identifier passed to the signaling endpoint.
    pub model: String,
    /// Wall-clock budget measured from the Connected transition.
    pub budget: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_REALTIME_MODEL.to_string(),
            budget: SESSION_BUDGET,
        }
    }
}

impl SessionSettings {
    pub fn budget_secs(&self) -> u64 {
        self.budget.as_secs()
    }
}
