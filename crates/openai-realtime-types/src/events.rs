//! Server events delivered over the `oai-events` data channel.
//!
//! Only the events that describe the model's audio output are modelled. Every
//! other `type` tag deserializes to [`ServerEvent::Unrecognized`] so that a new
//! or unexpected event never turns into a decode error.

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The server began playing model audio into the peer connection.
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        event_id: Option<String>,
        response_id: Option<String>,
    },
    /// The model audio finished playing.
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        event_id: Option<String>,
        response_id: Option<String>,
    },
    /// Playback was cut short, e.g. because the user interrupted.
    #[serde(rename = "output_audio_buffer.cleared")]
    OutputAudioBufferCleared {
        event_id: Option<String>,
        response_id: Option<String>,
    },
    /// The model finished its turn.
    #[serde(rename = "response.done")]
    ResponseDone { event_id: Option<String> },
    #[serde(other)]
    Unrecognized,
}
