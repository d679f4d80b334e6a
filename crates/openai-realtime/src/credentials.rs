//! Credential providers: where the short-lived client secret comes from.

use crate::{OPENAI_API_BASE, join_url, truncate_body};
use async_trait::async_trait;
use chrono::DateTime;
use openai_realtime_types::{ClientSecret, EphemeralSession, SessionRequest};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, instrument, warn};
use voicecoach_core::{
    Credential, CredentialProvider, SessionError, SessionParams, params::DEFAULT_REALTIME_MODEL,
};

const DEFAULT_VOICE: &str = "alloy";

/// Asks the coaching backend to mint a client secret for a coach and locale.
///
/// The backend holds the real API key; the client only ever sees the
/// ephemeral secret it returns.
#[derive(Debug, Clone)]
pub struct BackendCredentialProvider {
    client: reqwest::Client,
    backend_url: String,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    coach_id: &'a str,
    locale: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
}

impl BackendCredentialProvider {
    pub fn new(backend_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), backend_url)
    }

    pub fn with_client(client: reqwest::Client, backend_url: impl Into<String>) -> Self {
        Self {
            client,
            backend_url: backend_url.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for BackendCredentialProvider {
    #[instrument(name = "backend_credential", skip_all, fields(coach = %params.coach_id))]
    async fn fetch(&self, params: &SessionParams) -> Result<Credential, SessionError> {
        let body = TokenRequest {
            coach_id: &params.coach_id,
            locale: &params.locale,
            context: params.context.as_deref(),
        };
        let request = self
            .client
            .post(join_url(&self.backend_url, "voice/token"))
            .json(&body);
        read_session(request).await
    }
}

/// Mints the client secret directly from the realtime sessions endpoint.
///
/// Needs a full API key, so it is only meant for development setups.
pub struct OpenAiSessionCredentialProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    voice: String,
}

impl OpenAiSessionCredentialProvider {
    pub fn new(api_key: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: OPENAI_API_BASE.to_string(),
            api_key,
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }
}

#[async_trait]
impl CredentialProvider for OpenAiSessionCredentialProvider {
    #[instrument(
        name = "session_credential",
        skip_all,
        fields(coach = %params.coach_id, model = %self.model)
    )]
    async fn fetch(&self, params: &SessionParams) -> Result<Credential, SessionError> {
        let body = SessionRequest {
            model: self.model.clone(),
            voice: Some(self.voice.clone()),
            instructions: Some(build_instructions(params)),
        };
        let request = self
            .client
            .post(join_url(&self.base_url, "realtime/sessions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body);
        read_session(request).await
    }
}

/// System instructions for a coach persona.
fn build_instructions(params: &SessionParams) -> String {
    let mut instructions = format!(
        "You are {}, a friendly voice coach. Speak only in the language identified by the \
         locale tag {}. Keep each turn short, ask one question at a time, and gently correct \
         mistakes.",
        params.coach_id, params.locale
    );
    if let Some(context) = params.context.as_deref().filter(|c| !c.trim().is_empty()) {
        instructions.push_str("\n\nSession context: ");
        instructions.push_str(context.trim());
    }
    instructions
}

async fn read_session(request: reqwest::RequestBuilder) -> Result<Credential, SessionError> {
    let response = request
        .send()
        .await
        .map_err(|e| SessionError::TransportFailed(format!("credential request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!(%status, "Credential endpoint refused the request.");
        return Err(SessionError::Unknown(format!(
            "credential endpoint returned {status}: {}",
            truncate_body(&body)
        )));
    }

    let session: EphemeralSession = response
        .json()
        .await
        .map_err(|e| SessionError::Unknown(format!("credential response is not usable: {e}")))?;
    debug!(expires_at = ?session.client_secret.expires_at, "Received client secret.");
    into_credential(session.client_secret)
}

fn into_credential(secret: ClientSecret) -> Result<Credential, SessionError> {
    if secret.value.is_empty() {
        return Err(SessionError::Unknown(
            "credential endpoint returned an empty client secret".to_string(),
        ));
    }
    let expires_at = secret.expires_at.and_then(|ts| DateTime::from_timestamp(ts, 0));
    let credential = Credential::new(secret.value);
    Ok(match expires_at {
        Some(at) => credential.with_expiry(at),
        None => credential,
    })
}
