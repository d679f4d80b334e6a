//! Seams between the session state machine and the outside world.
//!
//! Each trait is one external capability the manager sequences during
//! `start`. Implementations classify their own failures into
//! [`SessionError`]; the manager never inspects transport-specific errors.

use crate::{
    error::SessionError,
    params::{Credential, SessionParams},
};
use async_trait::async_trait;
use bytes::Bytes;
use openai_realtime_types::SessionDescription;
use std::time::Duration;
use tokio::sync::mpsc;

#[cfg(test)]
use mockall::automock;

/// A block of mono PCM16 audio captured from the local microphone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioFrame {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Issues the short-lived secret that authorizes one signaling exchange.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self, params: &SessionParams) -> Result<Credential, SessionError>;
}

/// The only component allowed to touch host audio hardware.
#[async_trait]
pub trait MediaAcquirer: Send + Sync {
    /// Prompts for microphone permission if needed and opens a capture stream.
    ///
    /// A refused prompt is [`SessionError::PermissionDenied`]; a host without
    /// any capture support is [`SessionError::CapabilityUnavailable`].
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, SessionError>;
}

/// A live local capture stream.
pub trait CaptureStream: Send {
    /// Human-readable name of the underlying device.
    fn label(&self) -> &str;

    /// Hands out the frame receiver. Returns `None` once taken.
    fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>>;

    /// Stops capturing and releases the device. Must be idempotent.
    fn stop(&mut self);
}

/// Builds peer transports. Its presence is the host's media-transport capability.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn PeerTransport>, SessionError>;
}

/// A peer-to-peer media transport with one inbound event data channel.
#[async_trait]
pub trait PeerTransport: Send {
    /// Attaches the capture stream's audio as local tracks.
    async fn attach_capture(&mut self, capture: &mut dyn CaptureStream)
    -> Result<(), SessionError>;

    /// Generates the local offer. Only called after `attach_capture`.
    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError>;

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError>;

    /// Raw, undecoded messages from the event data channel. Returns `None`
    /// once taken.
    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>>;

    /// Closes the data channel and then the transport. Must be idempotent.
    async fn close(&mut self);
}

/// Performs the one-shot offer/answer exchange with the remote voice endpoint.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SignalingClient: Send + Sync {
    async fn exchange(
        &self,
        offer: &SessionDescription,
        credential: &Credential,
        model: &str,
    ) -> Result<SessionDescription, SessionError>;
}
