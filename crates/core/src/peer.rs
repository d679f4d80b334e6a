//! The peer session: one transport plus the capture stream feeding it.

use crate::{
    collaborators::{CaptureStream, PeerTransport},
    error::SessionError,
};
use bytes::Bytes;
use openai_realtime_types::{SdpType, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Owns the peer transport, the local tracks attached to it, and the inbound
/// event channel.
///
/// Construction attaches the capture stream's tracks *before* the local offer
/// is generated, so the offer always carries an audio media line. Once
/// constructed, the session owns the capture stream and stops it on
/// [`PeerSession::close`].
pub struct PeerSession {
    transport: Box<dyn PeerTransport>,
    capture: Box<dyn CaptureStream>,
    local_offer: SessionDescription,
    closed: bool,
}

impl PeerSession {
    /// Attaches `capture` to `transport` and creates the local offer.
    ///
    /// On failure both the capture stream and the transport are released
    /// before the error is returned.
    pub async fn open(
        transport: Box<dyn PeerTransport>,
        capture: Box<dyn CaptureStream>,
    ) -> Result<Self, SessionError> {
        Self::open_until(transport, capture, std::future::pending())
            .await?
            .ok_or_else(|| {
                SessionError::Unknown("peer session construction was cancelled".to_string())
            })
    }

    /// Like [`PeerSession::open`], but gives up as soon as `cancelled`
    /// resolves. The capture stream and transport are released and `None`
    /// is returned.
    pub async fn open_until(
        mut transport: Box<dyn PeerTransport>,
        mut capture: Box<dyn CaptureStream>,
        cancelled: impl Future<Output = ()>,
    ) -> Result<Option<Self>, SessionError> {
        let prepared = tokio::select! {
            biased;
            _ = cancelled => None,
            result = prepare_offer(transport.as_mut(), capture.as_mut()) => Some(result),
        };
        match prepared {
            Some(Ok(local_offer)) => {
                info!(capture = capture.label(), "Peer session constructed with local offer.");
                Ok(Some(Self {
                    transport,
                    capture,
                    local_offer,
                    closed: false,
                }))
            }
            Some(Err(e)) => {
                warn!(error = %e, "Peer session construction failed; releasing resources.");
                capture.stop();
                transport.close().await;
                Err(e)
            }
            None => {
                info!("Peer session construction cancelled; releasing capture and transport.");
                capture.stop();
                transport.close().await;
                Ok(None)
            }
        }
    }

    pub fn local_offer(&self) -> &SessionDescription {
        &self.local_offer
    }

    /// Applies the remote answer returned by signaling.
    pub async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::TransportFailed(
                "peer session is already closed".to_string(),
            ));
        }
        if answer.kind != SdpType::Answer {
            return Err(SessionError::NegotiationFailed(format!(
                "expected an answer, got an {}",
                answer.kind
            )));
        }
        self.transport.apply_answer(answer).await
    }

    /// Hands out the raw inbound data-channel receiver. `None` once taken.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<Bytes>> {
        self.transport.take_inbound()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops all local tracks, closes the data channel, and closes the
    /// transport. Further calls do nothing.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.capture.stop();
        self.transport.close().await;
        debug!("Peer session closed.");
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        if !self.closed {
            // The transport cleans itself up on drop; the capture device must
            // be released explicitly.
            warn!("Peer session dropped without close; stopping capture.");
            self.capture.stop();
        }
    }
}

async fn prepare_offer(
    transport: &mut dyn PeerTransport,
    capture: &mut dyn CaptureStream,
) -> Result<SessionDescription, SessionError> {
    transport.attach_capture(capture).await?;
    let offer = transport.create_offer().await?;
    if offer.kind != SdpType::Offer {
        return Err(SessionError::NegotiationFailed(format!(
            "transport produced an {} instead of an offer",
            offer.kind
        )));
    }
    if !offer.has_audio() {
        return Err(SessionError::NegotiationFailed(
            "local offer has no audio media line".to_string(),
        ));
    }
    Ok(offer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeCapture, FakeTransport, Tally};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_open_attaches_before_offer() {
        let tally = Tally::default();
        let (transport, _inbound) = FakeTransport::new(tally.clone());
        let capture = Box::new(FakeCapture::new(tally.clone()));
        let session = PeerSession::open(Box::new(transport), capture).await.unwrap();
        assert!(session.local_offer().has_audio());
        assert_eq!(tally.attached(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let tally = Tally::default();
        let (transport, _inbound) = FakeTransport::new(tally.clone());
        let mut session =
            PeerSession::open(Box::new(transport), Box::new(FakeCapture::new(tally.clone())))
                .await
                .unwrap();
        session.close().await;
        session.close().await;
        drop(session);
        assert!(tally.is_balanced());
        assert_eq!(tally.capture_stops(), 1);
        assert_eq!(tally.transport_closes(), 1);
    }

    #[tokio::test]
    async fn test_failed_offer_releases_everything() {
        let tally = Tally::default();
        let (mut transport, _inbound) = FakeTransport::new(tally.clone());
        transport.fail_offer = Some(SessionError::TransportFailed("ice".into()));
        let result =
            PeerSession::open(Box::new(transport), Box::new(FakeCapture::new(tally.clone()))).await;
        assert_eq!(result.err(), Some(SessionError::TransportFailed("ice".into())));
        assert_eq!(tally.capture_stops(), 1);
        assert_eq!(tally.transport_closes(), 1);
    }

    #[tokio::test]
    async fn test_offer_without_audio_is_rejected() {
        let tally = Tally::default();
        let (mut transport, _inbound) = FakeTransport::new(tally.clone());
        transport.skip_attach = true;
        let result =
            PeerSession::open(Box::new(transport), Box::new(FakeCapture::new(tally.clone()))).await;
        assert!(matches!(result, Err(SessionError::NegotiationFailed(_))));
        assert!(tally.is_balanced());
    }

    #[tokio::test]
    async fn test_apply_answer_rejects_offer_type() {
        let tally = Tally::default();
        let (transport, _inbound) = FakeTransport::new(tally.clone());
        let mut session =
            PeerSession::open(Box::new(transport), Box::new(FakeCapture::new(tally.clone())))
                .await
                .unwrap();
        let result = session.apply_answer(SessionDescription::offer("v=0")).await;
        assert!(matches!(result, Err(SessionError::NegotiationFailed(_))));

        session.apply_answer(SessionDescription::answer("v=0")).await.unwrap();
        assert_eq!(tally.answers(), 1);

        session.close().await;
        let result = session.apply_answer(SessionDescription::answer("v=0")).await;
        assert!(matches!(result, Err(SessionError::TransportFailed(_))));
    }

    #[tokio::test]
    async fn test_cancelled_open_releases_everything() {
        let tally = Tally::default();
        let (mut transport, _inbound) = FakeTransport::new(tally.clone());
        let stalled = Arc::new(Notify::new());
        transport.stall_offer = Some(stalled.clone());
        let cancel = Arc::new(Notify::new());

        let opening = {
            let cancel = cancel.clone();
            let tally = tally.clone();
            tokio::spawn(async move {
                PeerSession::open_until(
                    Box::new(transport),
                    Box::new(FakeCapture::new(tally)),
                    async move { cancel.notified().await },
                )
                .await
            })
        };
        stalled.notified().await;
        cancel.notify_one();

        let result = opening.await.unwrap();
        assert!(matches!(result, Ok(None)));
        assert_eq!(tally.capture_stops(), 1);
        assert_eq!(tally.transport_closes(), 1);
    }

    #[tokio::test]
    async fn test_drop_without_close_stops_capture() {
        let tally = Tally::default();
        let (transport, _inbound) = FakeTransport::new(tally.clone());
        let capture = Box::new(FakeCapture::new(tally.clone()));
        let session = PeerSession::open(Box::new(transport), capture).await.unwrap();
        drop(session);
        assert_eq!(tally.capture_stops(), 1);
    }
}
