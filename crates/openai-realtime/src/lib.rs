//! Network collaborators for voice sessions against the OpenAI Realtime API.
//!
//! - `credentials`: minting the short-lived client secret, either through the
//!   coaching backend or directly from the sessions endpoint.
//! - `signaling`: the one-shot SDP offer/answer exchange over HTTP.
//! - `transport` (feature `webrtc`): the peer transport itself.

pub mod credentials;
pub mod signaling;
#[cfg(feature = "webrtc")]
pub mod transport;

pub use credentials::{BackendCredentialProvider, OpenAiSessionCredentialProvider};
pub use signaling::HttpSignalingClient;
#[cfg(feature = "webrtc")]
pub use transport::{WebRtcConfig, WebRtcTransportFactory};

/// Default base URL of the OpenAI REST API.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Longest slice of an error response body carried into an error message.
const MAX_ERROR_BODY: usize = 512;

fn truncate_body(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
