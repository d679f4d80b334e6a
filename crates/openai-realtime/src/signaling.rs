//! SDP offer/answer exchange with the realtime endpoint.

use crate::{OPENAI_API_BASE, join_url, truncate_body};
use async_trait::async_trait;
use openai_realtime_types::{SessionDescription, sdp::AnswerBody};
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, instrument, warn};
use voicecoach_core::{Credential, SessionError, SignalingClient};

/// Posts the local offer to `{base}/realtime?model=...` and returns the answer.
///
/// The exchange is one-shot: failures are classified and returned, never
/// retried here.
#[derive(Debug, Clone)]
pub struct HttpSignalingClient {
    client: reqwest::Client,
    base_url: String,
}

impl Default for HttpSignalingClient {
    fn default() -> Self {
        Self::new(OPENAI_API_BASE)
    }
}

impl HttpSignalingClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SignalingClient for HttpSignalingClient {
    #[instrument(name = "signaling", skip_all, fields(model = %model))]
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
        model: &str,
    ) -> Result<SessionDescription, SessionError> {
        let response = self
            .client
            .post(join_url(&self.base_url, "realtime"))
            .query(&[("model", model)])
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, "application/sdp")
            .body(offer.sdp.clone())
            .send()
            .await
            .map_err(|e| SessionError::TransportFailed(format!("signaling request failed: {e}")))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = response.text().await.map_err(|e| {
            SessionError::TransportFailed(format!("failed to read signaling answer: {e}"))
        })?;

        if !status.is_success() {
            warn!(%status, "Signaling endpoint rejected the offer.");
            return Err(SessionError::NegotiationFailed(format!(
                "signaling endpoint returned {status}: {}",
                truncate_body(&body)
            )));
        }
        debug!(%status, content_type, "Received signaling answer.");
        parse_answer(&content_type, body)
    }
}

/// Accepts either a raw `application/sdp` body or JSON with an `sdp` field.
fn parse_answer(content_type: &str, body: String) -> Result<SessionDescription, SessionError> {
    let sdp = if content_type.contains("application/json") {
        serde_json::from_str::<AnswerBody>(&body)
            .map_err(|e| {
                SessionError::NegotiationFailed(format!("answer JSON is not usable: {e}"))
            })?
            .sdp
    } else {
        body
    };
    if !sdp.trim_start().starts_with("v=") {
        return Err(SessionError::NegotiationFailed(
            "signaling answer is not a session description".to_string(),
        ));
    }
    Ok(SessionDescription::answer(sdp))
}
