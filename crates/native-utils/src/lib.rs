//! Host-side audio for voice sessions.
//!
//! `pcm` holds the sample-format helpers shared by capture and transport.
//! `capture` provides the [`MediaAcquirer`](voicecoach_core::MediaAcquirer)
//! implementations: the real microphone when built with `host-audio`, and a
//! stand-in that reports the capability as unavailable otherwise.

pub mod capture;
pub mod pcm;
