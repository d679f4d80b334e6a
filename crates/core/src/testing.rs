//! In-crate fakes for the collaborator traits.
//!
//! Every fake reports into a shared [`Tally`] so tests can assert how many
//! resources were acquired and released. Release counters record raw calls,
//! so a resource released twice shows up as a count of two.

use crate::{
    collaborators::{
        AudioFrame, CaptureStream, MediaAcquirer, PeerTransport, SignalingClient,
        TransportFactory,
    },
    error::SessionError,
    params::Credential,
};
use async_trait::async_trait;
use bytes::Bytes;
use openai_realtime_types::SessionDescription;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{Notify, mpsc};

#[derive(Clone, Default)]
pub struct Tally {
    captures_opened: Arc<AtomicUsize>,
    capture_stops: Arc<AtomicUsize>,
    transports_created: Arc<AtomicUsize>,
    transport_closes: Arc<AtomicUsize>,
    attached: Arc<AtomicUsize>,
    answers: Arc<AtomicUsize>,
}

impl Tally {
    pub fn captures_opened(&self) -> usize {
        self.captures_opened.load(Ordering::SeqCst)
    }
    pub fn capture_stops(&self) -> usize {
        self.capture_stops.load(Ordering::SeqCst)
    }
    pub fn transports_created(&self) -> usize {
        self.transports_created.load(Ordering::SeqCst)
    }
    pub fn transport_closes(&self) -> usize {
        self.transport_closes.load(Ordering::SeqCst)
    }
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    /// Every opened capture was stopped once and every transport closed once.
    pub fn is_balanced(&self) -> bool {
        self.captures_opened() == self.capture_stops()
            && self.transports_created() == self.transport_closes()
    }
}

pub struct FakeCapture {
    tally: Tally,
    frames: Option<mpsc::Receiver<AudioFrame>>,
}

impl FakeCapture {
    pub fn new(tally: Tally) -> Self {
        tally.captures_opened.fetch_add(1, Ordering::SeqCst);
        let (_tx, rx) = mpsc::channel(1);
        Self {
            tally,
            frames: Some(rx),
        }
    }
}

impl CaptureStream for FakeCapture {
    fn label(&self) -> &str {
        "fake microphone"
    }

    fn take_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.frames.take()
    }

    fn stop(&mut self) {
        self.tally.capture_stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct FakeMedia {
    pub tally: Tally,
    pub refuse: Option<SessionError>,
}

#[async_trait]
impl MediaAcquirer for FakeMedia {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, SessionError> {
        if let Some(e) = &self.refuse {
            return Err(e.clone());
        }
        Ok(Box::new(FakeCapture::new(self.tally.clone())))
    }
}

/// A media acquirer that parks inside `acquire` until released.
pub struct GatedMedia {
    pub tally: Tally,
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedMedia {
    pub fn new(tally: Tally) -> Self {
        Self {
            tally,
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl MediaAcquirer for GatedMedia {
    async fn acquire(&self) -> Result<Box<dyn CaptureStream>, SessionError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Box::new(FakeCapture::new(self.tally.clone())))
    }
}

pub struct FakeTransport {
    tally: Tally,
    inbound: Option<mpsc::Receiver<Bytes>>,
    attached: bool,
    pub skip_attach: bool,
    pub fail_offer: Option<SessionError>,
    pub fail_answer: Option<SessionError>,
    /// Notified when `create_offer` is entered, which then never completes.
    pub stall_offer: Option<Arc<Notify>>,
    /// Notified when `apply_answer` is entered, which then never completes.
    pub stall_answer: Option<Arc<Notify>>,
}

impl FakeTransport {
    pub fn new(tally: Tally) -> (Self, mpsc::Sender<Bytes>) {
        tally.transports_created.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        (
            Self {
                tally,
                inbound: Some(rx),
                attached: false,
                skip_attach: false,
                fail_offer: None,
                fail_answer: None,
                stall_offer: None,
                stall_answer: None,
            },
            tx,
        )
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn attach_capture(
        &mut self,
        capture: &mut dyn CaptureStream,
    ) -> Result<(), SessionError> {
        if !self.skip_attach {
            let _ = capture.take_frames();
            self.attached = true;
            self.tally.attached.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, SessionError> {
        if let Some(entered) = &self.stall_offer {
            entered.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.fail_offer.take() {
            return Err(e);
        }
        let mut sdp = String::from("v=0\r\n");
        if self.attached {
            sdp.push_str("m=audio 9 UDP/TLS/RTP/SAVPF 0\r\n");
        }
        sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        Ok(SessionDescription::offer(sdp))
    }

    async fn apply_answer(&mut self, _answer: SessionDescription) -> Result<(), SessionError> {
        if let Some(entered) = &self.stall_answer {
            entered.notify_one();
            std::future::pending::<()>().await;
        }
        if let Some(e) = self.fail_answer.take() {
            return Err(e);
        }
        self.tally.answers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound.take()
    }

    async fn close(&mut self) {
        self.tally.transport_closes.fetch_add(1, Ordering::SeqCst);
        self.inbound = None;
    }
}

/// Builds [`FakeTransport`]s and keeps the inbound sender of the latest one so
/// tests can push data-channel messages.
#[derive(Default)]
pub struct FakeFactory {
    pub tally: Tally,
    pub fail_create: Option<SessionError>,
    pub fail_answer: Option<SessionError>,
    pub stall_offer: Option<Arc<Notify>>,
    pub stall_answer: Option<Arc<Notify>>,
    inbound: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
}

impl FakeFactory {
    pub fn new(tally: Tally) -> Self {
        Self {
            tally,
            ..Default::default()
        }
    }

    pub fn inbound_handle(&self) -> Arc<Mutex<Option<mpsc::Sender<Bytes>>>> {
        self.inbound.clone()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(&self) -> Result<Box<dyn PeerTransport>, SessionError> {
        if let Some(e) = &self.fail_create {
            return Err(e.clone());
        }
        let (mut transport, tx) = FakeTransport::new(self.tally.clone());
        transport.fail_answer = self.fail_answer.clone();
        transport.stall_offer = self.stall_offer.clone();
        transport.stall_answer = self.stall_answer.clone();
        *self.inbound.lock().unwrap() = Some(tx);
        Ok(Box::new(transport))
    }
}

/// A signaling client that parks inside `exchange` until released.
#[derive(Clone)]
pub struct GatedSignaling {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    pub outcome: Result<SessionDescription, SessionError>,
}

impl GatedSignaling {
    pub fn new(outcome: Result<SessionDescription, SessionError>) -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            outcome,
        }
    }
}

#[async_trait]
impl SignalingClient for GatedSignaling {
    async fn exchange(
        &self,
        _offer: &SessionDescription,
        _credential: &Credential,
        _model: &str,
    ) -> Result<SessionDescription, SessionError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.outcome.clone()
    }
}
