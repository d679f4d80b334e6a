//! WebRTC peer transport backed by `webrtc-rs`.
//!
//! One PCMU audio track carries the microphone; one data channel carries the
//! realtime event stream.

use async_trait::async_trait;
use bytes::Bytes;
use openai_realtime_types::{SdpType, SessionDescription};
use std::{sync::Arc, time::Duration};
use tokio::{runtime::Handle, sync::mpsc, task::JoinHandle};
use tracing::{debug, info, trace, warn};
use voicecoach_core::{
    AudioFrame, CaptureStream, PeerTransport, SessionError, TransportFactory,
};
use voicecoach_native_utils::pcm::{PCMU_SAMPLE_RATE, encode_ulaw};
use webrtc::{
    api::{
        API, APIBuilder, interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_PCMU, MediaEngine},
    },
    data_channel::{RTCDataChannel, data_channel_message::DataChannelMessage},
    ice_transport::ice_server::RTCIceServer,
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    rtp_transceiver::rtp_codec::RTCRtpCodecCapability,
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

/// Label of the data channel the realtime endpoint sends events on.
pub const DATA_CHANNEL_LABEL: &str = "oai-events";

const INBOUND_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct WebRtcConfig {
    pub ice_servers: Vec<String>,
    /// Upper bound on waiting for ICE gathering before the offer is sent anyway.
    pub gathering_timeout: Duration,
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            gathering_timeout: Duration::from_secs(5),
        }
    }
}

/// Creates a fresh peer connection for every session attempt.
#[derive(Debug, Clone, Default)]
pub struct WebRtcTransportFactory {
    config: WebRtcConfig,
}

impl WebRtcTransportFactory {
    pub fn new(config: WebRtcConfig) -> Self {
        Self { config }
    }
}

fn build_api() -> Result<API, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;
    let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
    Ok(APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

fn transport_error(context: &str) -> impl FnOnce(webrtc::Error) -> SessionError + '_ {
    move |e| SessionError::TransportFailed(format!("{context}: {e}"))
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(&self) -> Result<Box<dyn PeerTransport>, SessionError> {
        let api = build_api()
            .map_err(|e| SessionError::CapabilityUnavailable(format!("webrtc engine: {e}")))?;
        let rtc_config = RTCConfiguration {
            ice_servers: if self.config.ice_servers.is_empty() {
                Vec::new()
            } else {
                vec![RTCIceServer {
                    urls: self.config.ice_servers.clone(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(transport_error("failed to create peer connection"))?,
        );
        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            match state {
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                    warn!(%state, "Peer connection degraded.")
                }
                _ => debug!(%state, "Peer connection state changed."),
            }
            Box::pin(async {})
        }));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let dc = match open_event_channel(&pc, inbound_tx).await {
            Ok(dc) => dc,
            Err(e) => {
                close_quietly(&pc).await;
                return Err(e);
            }
        };

        Ok(Box::new(WebRtcTransport {
            pc,
            dc,
            inbound: Some(inbound_rx),
            pump: None,
            closed: false,
            gathering_timeout: self.config.gathering_timeout,
        }))
    }
}

/// Creates the event data channel and forwards its messages raw.
async fn open_event_channel(
    pc: &RTCPeerConnection,
    inbound_tx: mpsc::Sender<Bytes>,
) -> Result<Arc<RTCDataChannel>, SessionError> {
    let dc = pc
        .create_data_channel(DATA_CHANNEL_LABEL, None)
        .await
        .map_err(transport_error("failed to create event channel"))?;
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = inbound_tx.clone();
        Box::pin(async move {
            if tx.send(msg.data).await.is_err() {
                trace!("Inbound event dropped; nobody is listening.");
            }
        })
    }));
    Ok(dc)
}

async fn close_quietly(pc: &RTCPeerConnection) {
    if let Err(e) = pc.close().await {
        debug!(error = %e, "Peer connection close reported an error.");
    }
}

pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    dc: Arc<RTCDataChannel>,
    inbound: Option<mpsc::Receiver<Bytes>>,
    pump: Option<JoinHandle<()>>,
    closed: bool,
    gathering_timeout: Duration,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn attach_capture(
        &mut self,
        capture: &mut dyn CaptureStream,
    ) -> Result<(), SessionError> {
        let frames = capture.take_frames().ok_or_else(|| {
            SessionError::TransportFailed("capture stream has no frames to attach".to_string())
        })?;
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "voicecoach".to_owned(),
        ));
        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport_error("failed to add audio track"))?;

        // RTCP has to be read for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        self.pump = Some(tokio::spawn(pump_frames(frames, track)));
        info!(capture = capture.label(), "Microphone track attached.");
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(transport_error("failed to create offer"))?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(transport_error("failed to set local description"))?;

        if tokio::time::timeout(self.gathering_timeout, gathered.recv())
            .await
            .is_err()
        {
            warn!(
                timeout_ms = self.gathering_timeout.as_millis() as u64,
                "ICE gathering did not finish; sending the offer with the candidates found so far."
            );
        }

        let local = self.pc.local_description().await.ok_or_else(|| {
            SessionError::TransportFailed("local description missing after offer".to_string())
        })?;
        Ok(SessionDescription::offer(local.sdp))
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        if answer.kind != SdpType::Answer {
            return Err(SessionError::NegotiationFailed(format!(
                "expected an answer, got an {}",
                answer.kind
            )));
        }
        let remote = RTCSessionDescription::answer(answer.sdp).map_err(|e| {
            SessionError::NegotiationFailed(format!("answer could not be parsed: {e}"))
        })?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| SessionError::NegotiationFailed(format!("answer was not accepted: {e}")))
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound.take()
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Err(e) = self.dc.close().await {
            debug!(error = %e, "Event channel close reported an error.");
        }
        close_quietly(&self.pc).await;
        info!("Peer transport closed.");
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if self.closed {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let pc = Arc::clone(&self.pc);
            let dc = Arc::clone(&self.dc);
            handle.spawn(async move {
                let _ = dc.close().await;
                close_quietly(&pc).await;
            });
        }
    }
}

async fn pump_frames(mut frames: mpsc::Receiver<AudioFrame>, track: Arc<TrackLocalStaticSample>) {
    while let Some(frame) = frames.recv().await {
        let sample = Sample {
            duration: frame.duration(),
            data: Bytes::from(encode_ulaw(&frame.samples)),
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!(error = %e, "Failed to write audio sample; stopping track.");
            break;
        }
    }
    debug!("Capture frames exhausted.");
}
