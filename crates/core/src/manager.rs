//! The connection manager: the session state machine and sole owner of every
//! resource a session acquires.
//!
//! A session attempt walks through credential fetch, microphone acquisition,
//! peer construction, signaling, and answer application, strictly in that
//! order. Any failure short-circuits to `Error` after releasing whatever was
//! acquired so far. Explicit `stop`, budget expiry, disposal, and an abandoned
//! `start` future all funnel into one termination routine; the first signal
//! for an attempt acts and every later one finds a newer attempt number and
//! does nothing.

use crate::{
    clock::{ClockHandle, SessionClock},
    collaborators::{CredentialProvider, MediaAcquirer, SignalingClient, TransportFactory},
    error::{SessionError, StartError},
    events::EventInterpreter,
    params::{SessionParams, SessionSettings},
    peer::PeerSession,
    state::{SessionSnapshot, SessionState},
};
use bytes::Bytes;
use chrono::Utc;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{
    runtime::Handle,
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

/// Resolution of the session clock.
const TICK: Duration = Duration::from_secs(1);

/// The external capabilities a manager sequences during `start`.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub media: Arc<dyn MediaAcquirer>,
    /// `None` when the host cannot provide a peer transport at all.
    pub transport: Option<Arc<dyn TransportFactory>>,
    pub signaling: Arc<dyn SignalingClient>,
}

/// Why a live session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Stopped,
    Expired,
    Disposed,
    Abandoned,
}

/// The live resource set of a Connected session, and of a Connecting one
/// once its peer session exists.
#[derive(Default)]
struct PeerResources {
    peer: Option<PeerSession>,
    event_pump: Option<JoinHandle<()>>,
    clock: Option<ClockHandle>,
}

impl PeerResources {
    fn is_empty(&self) -> bool {
        self.peer.is_none() && self.event_pump.is_none() && self.clock.is_none()
    }

    /// Releases everything that is held. Safe from any state, any number of
    /// times; returns whether anything was actually released.
    async fn release_all(&mut self) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(mut clock) = self.clock.take() {
            clock.stop();
        }
        if let Some(pump) = self.event_pump.take() {
            pump.abort();
        }
        if let Some(mut peer) = self.peer.take() {
            peer.close().await;
        }
        debug!("Session resources released.");
        true
    }
}

/// Drives one voice session at a time.
///
/// Cloning yields another handle to the same session, so a UI can observe or
/// stop a session while another task is awaiting `start`.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    collaborators: Collaborators,
    settings: SessionSettings,
    /// Never held across a collaborator call.
    resources: Mutex<PeerResources>,
    /// Held by `start` for a whole attempt. Termination waits on it so that
    /// anything the setup path still owns is released before it returns.
    in_flight: Mutex<()>,
    status: watch::Sender<SessionSnapshot>,
}

impl ConnectionManager {
    pub fn new(collaborators: Collaborators, settings: SessionSettings) -> Self {
        let (status, _) = watch::channel(SessionSnapshot::idle(settings.budget_secs()));
        Self {
            inner: Arc::new(Inner {
                collaborators,
                settings,
                resources: Mutex::new(PeerResources::default()),
                in_flight: Mutex::new(()),
                status,
            }),
        }
    }

    /// Establishes a new session.
    ///
    /// Returns `Ok` once the state is `Connected`. A start issued while a
    /// session is connecting or connected is rejected without acquiring
    /// anything. If the attempt is stopped or disposed while in flight, the
    /// pending step is abandoned, whatever it acquired is released, and
    /// `Cancelled` is returned.
    pub async fn start(&self, params: SessionParams) -> Result<(), StartError> {
        let session_id = Uuid::new_v4();
        let attempt = self.inner.begin_attempt(session_id).await?;
        let span = info_span!("voice_session", %session_id, coach = %params.coach_id);

        let mut guard = AttemptGuard {
            inner: Arc::downgrade(&self.inner),
            attempt,
            armed: true,
        };
        let _in_flight = self.inner.in_flight.lock().await;
        let result = self.inner.connect(attempt, &params).instrument(span).await;
        guard.armed = false;
        result
    }

    /// Ends a connecting or connected session. A no-op in any other state.
    pub async fn stop(&self) {
        self.inner.terminate(None, Termination::Stopped).await;
    }

    /// Releases everything regardless of state. Any in-flight `start` has its
    /// result discarded.
    pub async fn dispose(&self) {
        self.inner.terminate(None, Termination::Disposed).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.status.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.status.borrow().state
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.inner.status.borrow().elapsed_secs
    }

    pub fn remaining_secs(&self) -> u64 {
        self.inner.status.borrow().remaining_secs()
    }

    pub fn is_ai_speaking(&self) -> bool {
        self.inner.status.borrow().ai_speaking
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.status.borrow().error_message.clone()
    }
}

impl Inner {
    /// Only meaningful while holding the resources lock, which every change to
    /// the attempt number also holds.
    fn is_current(&self, attempt: u64) -> bool {
        self.status.borrow().attempt == attempt
    }

    /// Resolves once `attempt` has been stopped, disposed, or replaced.
    fn superseded(&self, attempt: u64) -> impl Future<Output = ()> + Send + 'static {
        let mut status = self.status.subscribe();
        async move {
            let _ = status.wait_for(|s| s.attempt != attempt).await;
        }
    }

    /// Runs one setup step unless the attempt is superseded first, in which
    /// case the step is dropped and `None` is returned.
    async fn unless_superseded<T>(&self, attempt: u64, step: impl Future<Output = T>) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.superseded(attempt) => None,
            out = step => Some(out),
        }
    }

    async fn begin_attempt(&self, session_id: Uuid) -> Result<u64, StartError> {
        let mut resources = self.resources.lock().await;
        let state = self.status.borrow().state;
        if state.is_active() {
            warn!(%state, "Rejecting start while a session is active.");
            return Err(StartError::Rejected(state));
        }
        resources.release_all().await;

        let mut attempt = 0;
        self.status.send_modify(|s| {
            s.attempt += 1;
            attempt = s.attempt;
            s.session_id = Some(session_id);
            s.state = SessionState::Connecting;
            s.elapsed_secs = 0;
            s.ai_speaking = false;
            s.error_message = None;
        });
        Ok(attempt)
    }

    async fn connect(
        self: &Arc<Self>,
        attempt: u64,
        params: &SessionParams,
    ) -> Result<(), StartError> {
        let Some(factory) = self.collaborators.transport.clone() else {
            return self
                .fail(
                    attempt,
                    SessionError::CapabilityUnavailable(
                        "no peer transport is available on this host".to_string(),
                    ),
                )
                .await;
        };

        // 1. Credential.
        info!(locale = %params.locale, "Fetching session credential.");
        let fetched = self
            .unless_superseded(attempt, self.collaborators.credentials.fetch(params))
            .await;
        let credential = match fetched {
            Some(Ok(credential)) => credential,
            Some(Err(e)) => return self.fail(attempt, e).await,
            None => return Err(StartError::Cancelled),
        };

        // 2. Microphone.
        info!("Requesting microphone access.");
        let acquired = self
            .unless_superseded(attempt, self.collaborators.media.acquire())
            .await;
        let mut capture = match acquired {
            Some(Ok(capture)) => capture,
            Some(Err(e)) => return self.fail(attempt, e).await,
            None => return Err(StartError::Cancelled),
        };

        // 3. Peer construction and local offer.
        let transport = match self.unless_superseded(attempt, factory.create()).await {
            Some(Ok(transport)) => transport,
            Some(Err(e)) => {
                capture.stop();
                return self.fail(attempt, e).await;
            }
            None => {
                capture.stop();
                return Err(StartError::Cancelled);
            }
        };
        let peer = match PeerSession::open_until(transport, capture, self.superseded(attempt)).await
        {
            Ok(Some(peer)) => peer,
            Ok(None) => return Err(StartError::Cancelled),
            Err(e) => return self.fail(attempt, e).await,
        };
        let offer = peer.local_offer().clone();
        {
            let mut resources = self.resources.lock().await;
            if !self.is_current(attempt) {
                drop(resources);
                let mut peer = peer;
                peer.close().await;
                return Err(StartError::Cancelled);
            }
            resources.peer = Some(peer);
        }

        // 4. Signaling.
        if credential.is_expired(Utc::now()) {
            return self
                .fail(
                    attempt,
                    SessionError::NegotiationFailed(
                        "session credential expired before signaling".to_string(),
                    ),
                )
                .await;
        }
        info!(model = %self.settings.model, "Exchanging session descriptions.");
        let exchanged = self
            .unless_superseded(
                attempt,
                self.collaborators
                    .signaling
                    .exchange(&offer, &credential, &self.settings.model),
            )
            .await;
        drop(credential);
        let answer = match exchanged {
            Some(Ok(answer)) => answer,
            Some(Err(e)) => return self.fail(attempt, e).await,
            None => {
                info!("Discarding signaling of a cancelled attempt.");
                return Err(StartError::Cancelled);
            }
        };

        // 5. Remote answer. The peer leaves the resource set while the answer
        // is applied and this path releases it if the attempt is cancelled.
        let taken = {
            let mut resources = self.resources.lock().await;
            if !self.is_current(attempt) {
                return Err(StartError::Cancelled);
            }
            resources.peer.take()
        };
        let Some(mut peer) = taken else {
            return self
                .fail(
                    attempt,
                    SessionError::Unknown("peer session was released during signaling".to_string()),
                )
                .await;
        };
        match self.unless_superseded(attempt, peer.apply_answer(answer)).await {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                peer.close().await;
                return self.fail(attempt, e).await;
            }
            None => {
                peer.close().await;
                return Err(StartError::Cancelled);
            }
        }

        let mut resources = self.resources.lock().await;
        if !self.is_current(attempt) {
            drop(resources);
            peer.close().await;
            return Err(StartError::Cancelled);
        }
        if let Some(inbound) = peer.take_inbound() {
            resources.event_pump = Some(self.spawn_event_pump(attempt, inbound));
        } else {
            warn!("Transport exposed no event channel; AI speaking state will not update.");
        }
        resources.peer = Some(peer);
        resources.clock = Some(self.start_clock(attempt));
        self.status.send_modify(|s| {
            s.state = SessionState::Connected;
            s.elapsed_secs = 0;
            s.ai_speaking = false;
        });
        info!(budget_secs = self.settings.budget_secs(), "Session connected.");
        Ok(())
    }

    /// Releases the attempt's resources and records the classified error.
    /// Always returns `Err`; `Cancelled` if the attempt was already superseded.
    async fn fail(&self, attempt: u64, error: SessionError) -> Result<(), StartError> {
        let mut resources = self.resources.lock().await;
        if !self.is_current(attempt) {
            return Err(StartError::Cancelled);
        }
        resources.release_all().await;
        warn!(kind = %error.kind(), error = %error, "Session setup failed.");
        self.status.send_modify(|s| {
            s.state = SessionState::Error(error.kind());
            s.ai_speaking = false;
            s.error_message = Some(error.user_message());
        });
        Err(error.into())
    }

    /// The single termination routine. `attempt` pins the call to one attempt;
    /// `None` targets whatever is current.
    async fn terminate(&self, attempt: Option<u64>, cause: Termination) -> bool {
        let mut resources = self.resources.lock().await;
        let (current, state) = {
            let snapshot = self.status.borrow();
            (snapshot.attempt, snapshot.state)
        };
        if attempt.is_some_and(|a| a != current) {
            debug!(?cause, "Ignoring termination for a superseded attempt.");
            return false;
        }
        if cause != Termination::Disposed && !state.is_active() {
            debug!(?cause, %state, "Nothing to terminate.");
            return false;
        }

        // Bumping the attempt cancels whichever setup step is pending.
        self.status.send_modify(|s| {
            s.attempt += 1;
            if state.is_active() {
                s.state = SessionState::Ended;
            }
            s.ai_speaking = false;
        });
        let released = resources.release_all().await;
        drop(resources);

        if state == SessionState::Connecting {
            // Wait for the setup path to release what it still holds.
            let _settled = self.in_flight.lock().await;
        }
        if state.is_active() {
            info!(?cause, released, "Session ended.");
        } else if released {
            info!(?cause, "Released leftover session resources.");
        }
        true
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        attempt: u64,
        mut inbound: mpsc::Receiver<Bytes>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(
            async move {
                let mut interpreter = EventInterpreter::new();
                while let Some(raw) = inbound.recv().await {
                    let Some(speaking) = interpreter.interpret(&raw) else {
                        continue;
                    };
                    let Some(inner) = weak.upgrade() else {
                        break;
                    };
                    let changed = inner.status.send_if_modified(|s| {
                        if s.attempt != attempt
                            || s.state != SessionState::Connected
                            || s.ai_speaking == speaking
                        {
                            return false;
                        }
                        s.ai_speaking = speaking;
                        true
                    });
                    if changed {
                        debug!(speaking, "AI speaking state changed.");
                    }
                }
                debug!(ignored = interpreter.ignored(), "Event channel closed.");
            }
            .in_current_span(),
        )
    }

    fn start_clock(self: &Arc<Self>, attempt: u64) -> ClockHandle {
        let on_tick = {
            let weak = Arc::downgrade(self);
            move |elapsed: u64| {
                if let Some(inner) = weak.upgrade() {
                    inner.status.send_if_modified(|s| {
                        if s.attempt != attempt || s.state != SessionState::Connected {
                            return false;
                        }
                        s.elapsed_secs = elapsed;
                        true
                    });
                }
            }
        };
        // Termination releases the clock, so it must not run inside the
        // clock's own task.
        let on_expiry = {
            let weak = Arc::downgrade(self);
            move || {
                tokio::spawn(
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.terminate(Some(attempt), Termination::Expired).await;
                        }
                    }
                    .in_current_span(),
                );
            }
        };
        SessionClock::start(TICK, self.settings.budget_secs(), on_tick, on_expiry)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let resources = self.resources.get_mut();
        if resources.is_empty() {
            return;
        }
        warn!("Connection manager dropped with live resources; releasing.");
        if let Some(mut clock) = resources.clock.take() {
            clock.stop();
        }
        if let Some(pump) = resources.event_pump.take() {
            pump.abort();
        }
        if let Some(mut peer) = resources.peer.take() {
            match Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { peer.close().await });
                }
                // Dropping an unclosed peer session still stops its capture.
                Err(_) => drop(peer),
            }
        }
    }
}

/// Terminates an attempt whose `start` future was dropped before finishing.
struct AttemptGuard {
    inner: Weak<Inner>,
    attempt: u64,
    armed: bool,
}

impl Drop for AttemptGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let inner = self.inner.clone();
        let attempt = self.attempt;
        handle.spawn(async move {
            if let Some(inner) = inner.upgrade() {
                inner.terminate(Some(attempt), Termination::Abandoned).await;
            }
        });
    }
}
