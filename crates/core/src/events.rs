//! Decoding of inbound data-channel messages into session facts.
//!
//! The data channel carries many event types; only the ones describing the
//! model's audio output matter here. A message that fails to decode and a
//! message with an unrecognized tag take the same path: nothing changes.

use openai_realtime_types::ServerEvent;
use tracing::trace;

/// The session-relevant meaning of one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent {
    AudioOutputStarted,
    AudioOutputEnded,
    Unrecognized,
}

impl InboundEvent {
    pub fn decode(raw: &[u8]) -> Self {
        match serde_json::from_slice::<ServerEvent>(raw) {
            Ok(ServerEvent::OutputAudioBufferStarted { .. }) => InboundEvent::AudioOutputStarted,
            Ok(ServerEvent::OutputAudioBufferStopped { .. })
            | Ok(ServerEvent::OutputAudioBufferCleared { .. })
            | Ok(ServerEvent::ResponseDone { .. }) => InboundEvent::AudioOutputEnded,
            Ok(ServerEvent::Unrecognized) => InboundEvent::Unrecognized,
            Err(e) => {
                trace!(error = %e, "Ignoring undecodable data-channel message.");
                InboundEvent::Unrecognized
            }
        }
    }

    /// The new value of the AI-speaking flag, if this event sets one.
    pub fn speaking(self) -> Option<bool> {
        match self {
            InboundEvent::AudioOutputStarted => Some(true),
            InboundEvent::AudioOutputEnded => Some(false),
            InboundEvent::Unrecognized => None,
        }
    }
}

/// Tracks what the event stream has told us so far.
#[derive(Debug, Default)]
pub struct EventInterpreter {
    ignored: u64,
}

impl EventInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one raw message and returns the speaking-flag update it implies.
    pub fn interpret(&mut self, raw: &[u8]) -> Option<bool> {
        let update = InboundEvent::decode(raw).speaking();
        if update.is_none() {
            self.ignored += 1;
        }
        update
    }

    /// Number of messages that produced no update.
    pub fn ignored(&self) -> u64 {
        self.ignored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_started_sets_speaking() {
        let mut interpreter = EventInterpreter::new();
        assert_eq!(
            interpreter.interpret(br#"{"type":"output_audio_buffer.started","response_id":"r1"}"#),
            Some(true)
        );
    }

    #[test]
    fn test_audio_end_events_clear_speaking() {
        let mut interpreter = EventInterpreter::new();
        for raw in [
            br#"{"type":"output_audio_buffer.stopped"}"#.as_slice(),
            br#"{"type":"output_audio_buffer.cleared"}"#.as_slice(),
            br#"{"type":"response.done","response":{"status":"completed"}}"#.as_slice(),
        ] {
            assert_eq!(interpreter.interpret(raw), Some(false));
        }
        assert_eq!(interpreter.ignored(), 0);
    }

    #[test]
    fn test_malformed_and_unknown_are_ignored() {
        let mut interpreter = EventInterpreter::new();
        for raw in [
            b"not json".as_slice(),
            b"".as_slice(),
            br#"{"no_type":true}"#.as_slice(),
            br#"{"type":"session.updated"}"#.as_slice(),
            br#"["output_audio_buffer.started"]"#.as_slice(),
            b"\xff\xfe\x00".as_slice(),
        ] {
            assert_eq!(interpreter.interpret(raw), None);
        }
        assert_eq!(interpreter.ignored(), 6);
    }
}
