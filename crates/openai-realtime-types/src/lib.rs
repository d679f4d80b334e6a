//! Wire types for the OpenAI Realtime API over WebRTC.
//!
//! These are the shapes that cross the network boundary: session descriptions
//! exchanged during signaling, the JSON events that arrive on the `oai-events`
//! data channel, and the request/response bodies of the ephemeral session
//! endpoint. They carry no behavior beyond (de)serialization.

pub mod events;
pub mod sdp;
pub mod session;

pub use events::ServerEvent;
pub use sdp::{SdpType, SessionDescription};
pub use session::{ClientSecret, EphemeralSession, SessionRequest};
