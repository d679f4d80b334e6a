//! Bodies for the ephemeral session endpoint (`POST /v1/realtime/sessions`).

use serde::{Deserialize, Serialize};

/// Request body used to mint an ephemeral client secret.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// The part of the session response we care about.
#[derive(Debug, Clone, Deserialize)]
pub struct EphemeralSession {
    pub client_secret: ClientSecret,
}

#[derive(Clone, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    /// Unix timestamp (seconds) after which the secret is no longer accepted.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl std::fmt::Debug for ClientSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecret")
            .field("value", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
