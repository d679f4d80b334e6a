//! Voice Coaching Session Core
//!
//! This crate owns the lifecycle of one live voice-coaching session: fetching a
//! short-lived credential, acquiring the microphone, negotiating a peer
//! transport with the remote voice service, tracking the AI-speaking state from
//! the event data channel, and enforcing the session time budget.
//!
//! Everything that touches the network or audio hardware is reached through the
//! collaborator traits in [`collaborators`], so the state machine in
//! [`manager`] can be driven entirely by fakes in tests.

pub mod clock;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod manager;
pub mod params;
pub mod peer;
pub mod state;
#[cfg(test)]
mod testing;

pub use collaborators::{
    AudioFrame, CaptureStream, CredentialProvider, MediaAcquirer, PeerTransport, SignalingClient,
    TransportFactory,
};
pub use error::{ErrorKind, SessionError, StartError};
pub use manager::{Collaborators, ConnectionManager};
pub use openai_realtime_types::{SdpType, SessionDescription};
pub use params::{Credential, SessionParams, SessionSettings};
pub use state::{SessionSnapshot, SessionState};
