use serde::{Deserialize, Serialize};
use std::fmt;

/// The role a session description plays in the offer/answer exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// A typed session description, serialized the same way browsers do
/// (`{"type": "offer", "sdp": "v=0..."}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Returns true if the description contains at least one audio media line.
    pub fn has_audio(&self) -> bool {
        self.sdp.lines().any(|line| line.starts_with("m=audio"))
    }
}

/// The JSON form of an answer returned by some signaling endpoints instead of
/// a raw `application/sdp` body.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerBody {
    pub sdp: String,
}
