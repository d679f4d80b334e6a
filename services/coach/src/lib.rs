//! Voice coach service crate.
//!
//! Loads configuration, wires the network and audio collaborators into a
//! [`ConnectionManager`], and watches a running session. The `coach` binary is
//! a thin wrapper around this library.

pub mod config;
pub mod monitor;

use config::{Config, CredentialSource};
use openai_realtime::{
    BackendCredentialProvider, HttpSignalingClient, OpenAiSessionCredentialProvider,
};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::info;
use voicecoach_core::{
    Collaborators, ConnectionManager, CredentialProvider, MediaAcquirer, SessionSettings,
    TransportFactory,
};

/// Builds the collaborator set for this build and configuration.
///
/// Without the `native` feature there is no transport factory and capture
/// reports itself unavailable, so every attempt ends in
/// `CapabilityUnavailable` before touching the network.
pub fn build_collaborators(config: &Config) -> Collaborators {
    let credentials: Arc<dyn CredentialProvider> = match config.credential_source {
        CredentialSource::Backend => {
            info!("Using the coaching backend for session credentials.");
            Arc::new(BackendCredentialProvider::new(
                config.backend_url.clone().unwrap_or_default(),
            ))
        }
        CredentialSource::OpenAI => {
            info!("Minting session credentials directly with an API key.");
            let api_key = config
                .openai_api_key
                .as_ref()
                .map(|key| key.expose_secret().to_owned())
                .unwrap_or_default();
            Arc::new(
                OpenAiSessionCredentialProvider::new(SecretString::from(api_key))
                    .with_base_url(config.realtime_base_url.clone())
                    .with_model(config.model.clone()),
            )
        }
    };

    Collaborators {
        credentials,
        media: media_acquirer(),
        transport: transport_factory(),
        signaling: Arc::new(HttpSignalingClient::new(config.realtime_base_url.clone())),
    }
}

pub fn build_manager(config: &Config) -> ConnectionManager {
    let settings = SessionSettings {
        model: config.model.clone(),
        budget: config.budget,
    };
    ConnectionManager::new(build_collaborators(config), settings)
}

#[cfg(feature = "native")]
fn media_acquirer() -> Arc<dyn MediaAcquirer> {
    Arc::new(voicecoach_native_utils::capture::CpalMediaAcquirer::default())
}

#[cfg(not(feature = "native"))]
fn media_acquirer() -> Arc<dyn MediaAcquirer> {
    Arc::new(voicecoach_native_utils::capture::UnsupportedMediaAcquirer)
}

#[cfg(feature = "native")]
fn transport_factory() -> Option<Arc<dyn TransportFactory>> {
    Some(Arc::new(openai_realtime::WebRtcTransportFactory::default()))
}

#[cfg(not(feature = "native"))]
fn transport_factory() -> Option<Arc<dyn TransportFactory>> {
    None
}
